use hikari::{
    assemble::assemble_track,
    download::DownloadResult,
    segment::{init_file_name, segment_file_name},
    HikariError, TrackKind,
};

fn video_result(dir: &std::path::Path, total: u64, failed: Vec<u64>) -> DownloadResult {
    DownloadResult {
        track: TrackKind::Video,
        init_path: Some(dir.join(init_file_name(TrackKind::Video, "init.mp4"))),
        dir: dir.to_path_buf(),
        total,
        successful: total - failed.len() as u64,
        failed,
    }
}

#[tokio::test]
async fn test_assemble_orders_by_segment_number() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let dir = temp.path();

    std::fs::write(dir.join(init_file_name(TrackKind::Video, "init.mp4")), b"INIT")?;
    // segment files land on disk in completion order, not timeline order
    for number in [3u64, 1, 2] {
        std::fs::write(
            dir.join(segment_file_name(
                TrackKind::Video,
                number,
                &format!("seg-{number}.m4s"),
            )),
            format!("V{number}"),
        )?;
    }
    // chunks of the other track sharing the directory are ignored
    std::fs::write(
        dir.join(segment_file_name(TrackKind::Audio, 1, "seg-1.m4s")),
        b"A1",
    )?;

    let output = dir.join("video.mp4");
    assemble_track(&video_result(dir, 3, vec![]), &output).await?;
    assert_eq!(std::fs::read(&output)?, b"INITV1V2V3");
    Ok(())
}

#[tokio::test]
async fn test_assemble_skips_missing_segments() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let dir = temp.path();

    std::fs::write(dir.join(init_file_name(TrackKind::Video, "init.mp4")), b"INIT")?;
    for number in [1u64, 3] {
        std::fs::write(
            dir.join(segment_file_name(
                TrackKind::Video,
                number,
                &format!("seg-{number}.m4s"),
            )),
            format!("V{number}"),
        )?;
    }

    let output = dir.join("video.mp4");
    assemble_track(&video_result(dir, 3, vec![2]), &output).await?;
    assert_eq!(std::fs::read(&output)?, b"INITV1V3");
    Ok(())
}

#[tokio::test]
async fn test_assemble_without_init_segment() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let result = DownloadResult {
        track: TrackKind::Video,
        init_path: None,
        dir: temp.path().to_path_buf(),
        total: 3,
        successful: 0,
        failed: vec![1, 2, 3],
    };

    let output = temp.path().join("video.mp4");
    let err = assemble_track(&result, &output).await.unwrap_err();
    assert!(matches!(err, HikariError::MissingInitSegment(TrackKind::Video)));
    assert!(!output.exists());
    Ok(())
}
