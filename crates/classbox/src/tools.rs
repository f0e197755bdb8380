//! External tools driven by the pipeline.
//!
//! Decryption and muxing shell out to mp4decrypt and ffmpeg. Both sit behind
//! traits so the pipeline can run against stand-ins where the binaries are
//! not installed.

use std::future::Future;
use std::path::Path;
use std::process::ExitStatus;

use tokio::process::Command;

use crate::error::{ClassboxError, ClassboxResult};

/// Strips the CENC layer from one downloaded track.
pub trait Decrypter {
    fn decrypt(
        &self,
        kid: &str,
        key: &str,
        input: &Path,
        output: &Path,
    ) -> impl Future<Output = ClassboxResult<()>> + Send;
}

/// Combines the clear audio and video tracks into the final file.
pub trait Muxer {
    fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> impl Future<Output = ClassboxResult<()>> + Send;
}

/// `mp4decrypt` from the Bento4 suite.
///
/// Every assembled input holds a single track, so the key is bound to
/// track 1 rather than addressed by KID.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Decrypt;

impl Decrypter for Mp4Decrypt {
    async fn decrypt(
        &self,
        _kid: &str,
        key: &str,
        input: &Path,
        output: &Path,
    ) -> ClassboxResult<()> {
        let mp4decrypt = which::which("mp4decrypt")?;
        log::debug!("Decrypting {} with mp4decrypt...", input.display());

        let status = Command::new(mp4decrypt)
            .arg("--key")
            .arg(format!("1:{key}"))
            .arg(input)
            .arg(output)
            .status()
            .await?;
        check_tool_status("mp4decrypt", status)
    }
}

/// Stream-copy mux through the ffmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMux {
    /// Extra arguments inserted before the output path, in shell syntax.
    pub extra_args: Option<String>,
}

impl Muxer for FfmpegMux {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> ClassboxResult<()> {
        let ffmpeg = which::which("ffmpeg")?;
        log::debug!("Muxing with ffmpeg CLI...");

        let mut command = Command::new(ffmpeg);
        command
            .args(["-y", "-loglevel", "error"])
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy"]);
        if let Some(extra) = &self.extra_args {
            command.args(shlex::split(extra).unwrap_or_default());
        }

        let status = command.arg(output).status().await?;
        check_tool_status("ffmpeg", status)
    }
}

fn check_tool_status(tool: &'static str, status: ExitStatus) -> ClassboxResult<()> {
    if status.success() {
        Ok(())
    } else {
        Err(ClassboxError::ToolFailure { tool, status })
    }
}
