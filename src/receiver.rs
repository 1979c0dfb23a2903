//! Inbound stream handling: accept loop, per-connection demultiplexing, and
//! frame publication.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::delimiter::{DelimiterError, FrameDelimiter};
use crate::distributor::FrameDistributor;
use crate::frame::Frame;
use crate::state::{ConnectionState, StatusTx};

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] DelimiterError),
}

/// Consumes one established connection until it closes or errors.
///
/// Reads bounded chunks, feeds the delimiter, decodes every complete frame
/// and publishes it. The delimiter (and with it the accumulation buffer) is
/// owned per-instance, so a fresh receiver per connection guarantees no
/// frame straddles two TCP sessions.
pub struct StreamReceiver {
    stream: TcpStream,
    delimiter: FrameDelimiter,
    distributor: Arc<FrameDistributor>,
    chunk_size: usize,
}

impl StreamReceiver {
    pub fn new(
        stream: TcpStream,
        distributor: Arc<FrameDistributor>,
        chunk_size: usize,
        max_buffer: usize,
    ) -> Self {
        Self {
            stream,
            delimiter: FrameDelimiter::new(max_buffer),
            distributor,
            chunk_size,
        }
    }

    /// Runs until end-of-stream, a transport/protocol error, or
    /// cancellation. Decode failures are not errors: the bytes are already
    /// consumed, the frame is dropped, the stream goes on.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<(), ReceiverError> {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut seq = 0u64;
        let mut rejected = 0u64;

        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.stream.read(&mut chunk) => result?,
            };
            if n == 0 {
                debug!(frames = %seq, rejected = %rejected, "end of stream");
                return Ok(());
            }

            self.delimiter.push(&chunk[..n])?;
            while let Some(raw) = self.delimiter.next_frame() {
                seq += 1;
                match Frame::decode(&raw, seq) {
                    Ok(frame) => self.distributor.publish(frame),
                    Err(e) => {
                        rejected += 1;
                        debug!(error = %e, bytes = %raw.len(), "dropping undecodable frame");
                    }
                }
            }
        }
    }
}

/// Binds the listen socket and serves senders until cancelled.
pub async fn serve(
    config: &ReceiverConfig,
    distributor: Arc<FrameDistributor>,
    status: StatusTx,
    cancel: CancellationToken,
) -> Result<(), ReceiverError> {
    let addr = format!("{}:{}", config.listen_addr, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "listening for stream");

    serve_with(
        listener,
        config.chunk_size,
        config.max_buffer_bytes,
        distributor,
        status,
        cancel,
    )
    .await
}

/// Accept loop over an already-bound listener. One connection at a time; a
/// dropped connection clears the latest-frame slot and returns the loop to
/// waiting. No failure here is fatal to the process.
pub async fn serve_with(
    listener: TcpListener,
    chunk_size: usize,
    max_buffer: usize,
    distributor: Arc<FrameDistributor>,
    status: StatusTx,
    cancel: CancellationToken,
) -> Result<(), ReceiverError> {
    loop {
        let _ = status.send(ConnectionState::Connecting);

        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
        };

        info!(peer = %peer, "sender connected");
        let _ = status.send(ConnectionState::Streaming);

        let receiver = StreamReceiver::new(
            stream,
            Arc::clone(&distributor),
            chunk_size,
            max_buffer,
        );
        match receiver.run(&cancel).await {
            Ok(()) => info!(peer = %peer, "sender disconnected"),
            Err(e) => warn!(peer = %peer, error = %e, "connection dropped"),
        }

        // No stale image while waiting for the next sender.
        distributor.clear();

        if cancel.is_cancelled() {
            break;
        }
    }

    let _ = status.send(ConnectionState::Disconnected);
    info!("receiver stopped");
    Ok(())
}
