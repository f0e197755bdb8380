use std::path::{Path, PathBuf};

use tokio::fs::File;

use crate::{
    download::DownloadResult,
    error::{HikariError, HikariResult},
    segment::parse_segment_file_name,
};

/// Concatenate a downloaded track into a single file: the init segment
/// first, then every media segment in segment-number order.
///
/// Failed segments are absent from the directory and are skipped; callers
/// decide through [DownloadResult::failed] whether that is acceptable.
pub async fn assemble_track(
    result: &DownloadResult,
    output: impl AsRef<Path>,
) -> HikariResult<PathBuf> {
    let init_path = result
        .init_path
        .as_ref()
        .ok_or(HikariError::MissingInitSegment(result.track))?;

    let mut chunks = Vec::with_capacity(result.successful as usize);
    let mut entries = tokio::fs::read_dir(&result.dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some((number, track, _)) = parse_segment_file_name(name) {
            if track == result.track {
                chunks.push((number, entry.path()));
            }
        }
    }
    chunks.sort_unstable_by_key(|(number, _)| *number);

    log::info!(
        "Merging {} chunks of {} track...",
        chunks.len(),
        result.track
    );

    let output = output.as_ref();
    let mut target = File::create(output).await?;
    let mut init = File::open(init_path).await?;
    tokio::io::copy(&mut init, &mut target).await?;
    for (_, path) in chunks {
        let mut chunk = File::open(path).await?;
        tokio::io::copy(&mut chunk, &mut target).await?;
    }

    Ok(output.to_path_buf())
}
