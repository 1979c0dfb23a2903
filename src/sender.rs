//! Capture-to-socket pump and the retry-forever reconnect policy.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{CameraSource, CaptureError};
use crate::config::SenderConfig;
use crate::state::{ConnectionState, StatusTx};

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve host `{host}`")]
    Resolve { host: String },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("capture source ended")]
    CaptureEnded,
}

/// Forwards raw MJPEG bytes from a capture source to a connected socket.
///
/// Generic over the source so tests can drive it with an in-memory reader;
/// production uses [`CameraSource`].
pub struct StreamSender<R> {
    source: R,
    chunk_size: usize,
}

impl<R: AsyncRead + Unpin> StreamSender<R> {
    pub fn new(source: R, chunk_size: usize) -> Self {
        Self { source, chunk_size }
    }

    /// Pumps until the capture source ends, a write fails, or the token is
    /// cancelled. Cancellation is a clean stop, the other two are errors the
    /// outer policy recovers from.
    pub async fn run<W: AsyncWrite + Unpin>(
        &mut self,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<(), SenderError> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = Self::pump(&mut self.source, sink, self.chunk_size) => result,
        }
    }

    /// Gives the capture source back for teardown.
    pub fn into_source(self) -> R {
        self.source
    }

    async fn pump<W: AsyncWrite + Unpin>(
        source: &mut R,
        sink: &mut W,
        chunk_size: usize,
    ) -> Result<(), SenderError> {
        let mut buf = vec![0u8; chunk_size];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                return Err(SenderError::CaptureEnded);
            }
            sink.write_all(&buf[..n]).await?;
        }
    }
}

/// Runs the sender forever: resolve, connect, stream, and on any failure
/// tear down both the capture process and the connection, wait the fixed
/// backoff, and start over. Only cancellation ends the loop; the policy
/// assumes the receiver will eventually come back.
pub async fn run_with_reconnect(
    config: &SenderConfig,
    status: &StatusTx,
    cancel: &CancellationToken,
) -> Result<(), SenderError> {
    let delay = Duration::from_secs(config.reconnect_delay_secs);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let _ = status.send(ConnectionState::Connecting);

        match stream_once(config, status, cancel).await {
            Ok(()) => break, // cancelled mid-stream
            Err(e) => {
                warn!(error = %e, delay_secs = %config.reconnect_delay_secs, "stream ended, will reconnect");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let _ = status.send(ConnectionState::Disconnected);
    info!("sender stopped");
    Ok(())
}

/// One resolve→connect→stream cycle. Returns `Ok` only on cancellation.
async fn stream_once(
    config: &SenderConfig,
    status: &StatusTx,
    cancel: &CancellationToken,
) -> Result<(), SenderError> {
    let addr = resolve_target(&config.host, config.port).await?;

    info!(addr = %addr, "connecting to receiver");
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = TcpStream::connect(addr) => result?,
    };

    let source = CameraSource::spawn(&config.camera)?;
    let mut sender = StreamSender::new(source, config.chunk_size);

    let _ = status.send(ConnectionState::Streaming);
    info!(addr = %addr, "streaming started");

    let result = sender.run(&mut stream, cancel).await;
    sender.into_source().stop().await;
    result
}

/// Resolves the target address: a literal `ip:port` is used directly,
/// anything else goes through DNS (covers tunneled hostnames).
pub async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr, SenderError> {
    if let Ok(addr) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| SenderError::Resolve {
            host: host.to_string(),
        })?;

    addrs.next().ok_or_else(|| SenderError::Resolve {
        host: host.to_string(),
    })
}
