//! External MJPEG capture process.
//!
//! The pipeline does not talk to camera hardware itself; it consumes a
//! subprocess (libcamera-vid by default) that writes raw MJPEG to stdout.
//! End-of-stream on that pipe means the device failed, not a transient
//! hiccup, so the caller restarts the whole capture+connection pair.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

use crate::config::CameraConfig;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to spawn capture command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("capture process has no stdout pipe")]
    NoStdout,
}

/// A running capture subprocess, readable as a sequential MJPEG byte
/// producer. The child is killed when the source is stopped or dropped, so
/// a sender failure can never leak the camera process.
pub struct CameraSource {
    child: Child,
    stdout: ChildStdout,
    command: String,
}

impl CameraSource {
    pub fn spawn(config: &CameraConfig) -> Result<Self, CaptureError> {
        let args = match &config.args {
            Some(args) => args.clone(),
            None => default_args(config),
        };

        debug!(command = %config.command, ?args, "spawning capture process");

        let mut child = Command::new(&config.command)
            .args(&args)
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(CaptureError::NoStdout)?;

        info!(
            command = %config.command,
            resolution = %format!("{}x{}", config.width, config.height),
            fps = %config.fps,
            "capture process started"
        );

        Ok(Self {
            child,
            stdout,
            command: config.command.clone(),
        })
    }

    /// Terminates the capture process.
    pub async fn stop(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(command = %self.command, error = %e, "capture process already gone");
        }
        info!(command = %self.command, "capture process stopped");
    }
}

impl AsyncRead for CameraSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

/// libcamera-vid argument set: stream MJPEG to stdout until killed.
fn default_args(config: &CameraConfig) -> Vec<String> {
    vec![
        "-t".to_string(),
        "0".to_string(),
        "--width".to_string(),
        config.width.to_string(),
        "--height".to_string(),
        config.height.to_string(),
        "--framerate".to_string(),
        config.fps.to_string(),
        "--codec".to_string(),
        "mjpeg".to_string(),
        "-o".to_string(),
        "-".to_string(),
    ]
}
