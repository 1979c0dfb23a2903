//! Persistence sink: records the stream to disk on demand.
//!
//! The recorder is its own task, sampling the latest-frame slot at the
//! configured rate while a session is open and appending each frame as JPEG
//! to a `.mjpeg` file (raw concatenated Motion-JPEG). Writes are serialized
//! by the task owning the file; stopping or shutting down flushes and closes
//! it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::distributor::FrameDistributor;
use crate::frame::EncodeError;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("recording I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("no frame available")]
    NoFrame,
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Snapshot,
}

/// Control handle for the recorder task. Cheap to clone; commands are
/// fire-and-forget and ignored once the task has shut down.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<Command>,
}

impl RecorderHandle {
    /// Opens a new recording session; no-op if one is already open.
    pub async fn start(&self) {
        let _ = self.tx.send(Command::Start).await;
    }

    /// Closes the current recording session, if any.
    pub async fn stop(&self) {
        let _ = self.tx.send(Command::Stop).await;
    }

    /// Saves the current frame as a single JPEG file.
    pub async fn snapshot(&self) {
        let _ = self.tx.send(Command::Snapshot).await;
    }
}

pub struct Recorder {
    distributor: Arc<FrameDistributor>,
    dir: PathBuf,
    fps: u32,
    quality: u8,
    rx: mpsc::Receiver<Command>,
}

struct Session {
    writer: BufWriter<File>,
    path: PathBuf,
    frames: u64,
}

impl Recorder {
    pub fn new(
        distributor: Arc<FrameDistributor>,
        dir: impl Into<PathBuf>,
        fps: u32,
        quality: u8,
    ) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(8);
        (
            Self {
                distributor,
                dir: dir.into(),
                // A zero rate would make the tick interval undefined.
                fps: fps.max(1),
                quality,
                rx,
            },
            RecorderHandle { tx },
        )
    }

    /// Runs until cancelled or all handles are dropped. Never fails the
    /// process; write errors abort the current session only.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut session: Option<Session> = None;
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                command = self.rx.recv() => match command {
                    None => break,
                    Some(Command::Start) => {
                        if session.is_none() {
                            match self.open_session().await {
                                Ok(s) => {
                                    session = Some(s);
                                    // Don't replay ticks that piled up while idle.
                                    ticker.reset_immediately();
                                }
                                Err(e) => warn!(error = %e, "could not start recording"),
                            }
                        }
                    }
                    Some(Command::Stop) => {
                        if let Some(s) = session.take() {
                            close_session(s).await;
                        }
                    }
                    Some(Command::Snapshot) => {
                        if let Err(e) = self.save_snapshot().await {
                            warn!(error = %e, "could not save snapshot");
                        }
                    }
                },

                _ = ticker.tick(), if session.is_some() => {
                    let failed = match session.as_mut() {
                        Some(s) => self.write_frame(s).await.err(),
                        None => None,
                    };
                    if let Some(e) = failed {
                        warn!(error = %e, "recording write failed, closing session");
                        if let Some(s) = session.take() {
                            close_session(s).await;
                        }
                    }
                }
            }
        }

        // Shutdown never leaves an open file behind.
        if let Some(s) = session.take() {
            close_session(s).await;
        }
    }

    async fn open_session(&self) -> Result<Session, RecorderError> {
        let path = self.dir.join(format!("recording_{}.mjpeg", unix_timestamp()));
        let file = File::create(&path).await?;
        info!(path = %path.display(), fps = %self.fps, "recording started");
        Ok(Session {
            writer: BufWriter::new(file),
            path,
            frames: 0,
        })
    }

    async fn write_frame(&self, session: &mut Session) -> Result<(), RecorderError> {
        // An empty slot (e.g. sender disconnected mid-recording) is a gap,
        // not an error.
        let Some(frame) = self.distributor.read() else {
            return Ok(());
        };
        let jpeg = frame.encode_jpeg(self.quality)?;
        session.writer.write_all(&jpeg).await?;
        session.frames += 1;
        Ok(())
    }

    async fn save_snapshot(&self) -> Result<PathBuf, RecorderError> {
        let frame = self.distributor.read().ok_or(RecorderError::NoFrame)?;
        let jpeg = frame.encode_jpeg(self.quality)?;

        let path = self.dir.join(format!("snapshot_{}.jpg", unix_timestamp()));
        tokio::fs::write(&path, &jpeg).await?;
        info!(path = %path.display(), "snapshot saved");
        Ok(path)
    }
}

async fn close_session(mut session: Session) {
    if let Err(e) = session.writer.flush().await {
        warn!(path = %session.path.display(), error = %e, "flush on close failed");
    }
    info!(
        path = %session.path.display(),
        frames = %session.frames,
        "recording stopped"
    );
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lists recordings and snapshots in a directory, newest first.
pub async fn list_outputs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("recording_") || name.starts_with("snapshot_") {
            paths.push(entry.path());
        }
    }
    paths.sort();
    paths.reverse();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{test_image, Frame};

    fn distributor_with_frame() -> Arc<FrameDistributor> {
        let d = Arc::new(FrameDistributor::new());
        d.publish(Frame {
            image: test_image(16, 16),
            seq: 1,
        });
        d
    }

    #[tokio::test]
    async fn recording_session_writes_jpeg_frames() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = distributor_with_frame();
        let (recorder, handle) = Recorder::new(Arc::clone(&distributor), dir.path(), 50, 80);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));

        handle.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;
        cancel.cancel();
        task.await.unwrap();

        let outputs = list_outputs(dir.path()).await.unwrap();
        assert_eq!(outputs.len(), 1);

        let data = tokio::fs::read(&outputs[0]).await.unwrap();
        assert!(data.len() > 4, "recording should contain frames");
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn cancellation_flushes_open_session() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = distributor_with_frame();
        let (recorder, handle) = Recorder::new(Arc::clone(&distributor), dir.path(), 50, 80);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));

        handle.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // No stop command: shutdown alone must flush and close the file.
        cancel.cancel();
        task.await.unwrap();

        let outputs = list_outputs(dir.path()).await.unwrap();
        assert_eq!(outputs.len(), 1);

        let data = tokio::fs::read(&outputs[0]).await.unwrap();
        assert!(data.len() > 4, "flushed recording should contain frames");
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        assert_eq!(&data[data.len() - 2..], &[0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn zero_fps_is_clamped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = distributor_with_frame();
        let (recorder, handle) = Recorder::new(Arc::clone(&distributor), dir.path(), 0, 80);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));

        handle.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;
        cancel.cancel();
        task.await.unwrap();

        let outputs = list_outputs(dir.path()).await.unwrap();
        assert_eq!(outputs.len(), 1);

        let data = tokio::fs::read(&outputs[0]).await.unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn snapshot_writes_single_image() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = distributor_with_frame();
        let (recorder, handle) = Recorder::new(Arc::clone(&distributor), dir.path(), 20, 80);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));

        handle.snapshot().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        let outputs = list_outputs(dir.path()).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].to_string_lossy().contains("snapshot_"));

        let frame = Frame::decode(&tokio::fs::read(&outputs[0]).await.unwrap(), 1).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 16));
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = Arc::new(FrameDistributor::new());
        let (recorder, handle) = Recorder::new(distributor, dir.path(), 20, 80);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recorder.run(cancel.clone()));

        handle.stop().await;
        cancel.cancel();
        task.await.unwrap();

        assert!(list_outputs(dir.path()).await.unwrap().is_empty());
    }
}
