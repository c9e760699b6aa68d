//! Screenshots of a small region around the pointer, stored through [arena::ScreenshotArena].

pub mod arena;

use std::{io, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::storage::entities::Region;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Screen capture timed out")]
    Timeout,
    #[error("{program} failed: {reason}")]
    CommandFailed { program: &'static str, reason: String },
    #[error("Screen capture io failure: {0}")]
    Io(#[from] io::Error),
    /// No capture program is configured or installed on this machine.
    #[error("No screen capture provider is available")]
    NoProvider,
}

/// Capability of writing a JPEG of `region` to `destination`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture(
        &self,
        region: Region,
        destination: PathBuf,
        quality: u8,
    ) -> Result<(), CaptureError>;
}

/// Command line screenshot tools, tried in order until one produces the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgram {
    /// macOS `screencapture`.
    Screencapture,
    /// Wayland `grim`.
    Grim,
    /// ImageMagick `import` on X11.
    Import,
}

impl CaptureProgram {
    pub fn for_platform() -> Vec<CaptureProgram> {
        if cfg!(target_os = "macos") {
            vec![CaptureProgram::Screencapture]
        } else if cfg!(target_os = "linux") {
            vec![CaptureProgram::Grim, CaptureProgram::Import]
        } else {
            vec![]
        }
    }

    fn program(&self) -> &'static str {
        match self {
            CaptureProgram::Screencapture => "screencapture",
            CaptureProgram::Grim => "grim",
            CaptureProgram::Import => "import",
        }
    }

    pub fn arguments(&self, region: Region, destination: &str, quality: u8) -> Vec<String> {
        let Region {
            x,
            y,
            width,
            height,
        } = region;
        match self {
            CaptureProgram::Screencapture => vec![
                "-x".into(),
                "-R".into(),
                format!("{x},{y},{width},{height}"),
                "-t".into(),
                "jpg".into(),
                destination.into(),
            ],
            CaptureProgram::Grim => vec![
                "-g".into(),
                format!("{x},{y} {width}x{height}"),
                "-t".into(),
                "jpeg".into(),
                "-q".into(),
                quality.to_string(),
                destination.into(),
            ],
            CaptureProgram::Import => vec![
                "-silent".into(),
                "-window".into(),
                "root".into(),
                "-crop".into(),
                format!("{width}x{height}+{x}+{y}"),
                "-quality".into(),
                quality.to_string(),
                destination.into(),
            ],
        }
    }
}

pub struct CommandCapturer {
    programs: Vec<CaptureProgram>,
    timeout: Duration,
}

impl CommandCapturer {
    pub fn new(programs: Vec<CaptureProgram>, timeout: Duration) -> Self {
        Self { programs, timeout }
    }

    pub fn for_platform(timeout: Duration) -> Self {
        Self::new(CaptureProgram::for_platform(), timeout)
    }

    async fn run_program(
        program: CaptureProgram,
        region: Region,
        destination: &PathBuf,
        quality: u8,
    ) -> Result<(), CaptureError> {
        let output = Command::new(program.program())
            .args(program.arguments(region, &destination.to_string_lossy(), quality))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(CaptureError::CommandFailed {
                program: program.program(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(destination).await? {
            return Err(CaptureError::CommandFailed {
                program: program.program(),
                reason: "no file was written".into(),
            });
        }
        Ok(())
    }

    async fn capture_with_fallbacks(
        &self,
        region: Region,
        destination: PathBuf,
        quality: u8,
    ) -> Result<(), CaptureError> {
        let mut last_error = CaptureError::NoProvider;
        for program in &self.programs {
            match Self::run_program(*program, region, &destination, quality).await {
                Ok(()) => {
                    debug!("Captured {destination:?} with {}", program.program());
                    return Ok(());
                }
                Err(CaptureError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} is not installed", program.program());
                }
                Err(e) => {
                    warn!("Capture with {} failed {e}", program.program());
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl ScreenCapturer for CommandCapturer {
    #[instrument(skip(self))]
    async fn capture(
        &self,
        region: Region,
        destination: PathBuf,
        quality: u8,
    ) -> Result<(), CaptureError> {
        tokio::time::timeout(
            self.timeout,
            self.capture_with_fallbacks(region, destination, quality),
        )
        .await
        .map_err(|_| CaptureError::Timeout)?
    }
}
