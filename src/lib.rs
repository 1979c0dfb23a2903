//! MJPEG-over-TCP streaming pipeline.
//!
//! Moves a continuous MJPEG stream from a capture process, over one
//! persistent TCP connection, to independent consumers:
//!
//! - sender side: capture-and-transmit loop with automatic reconnection
//! - receiver side: incremental frame demultiplexer reconstructing discrete
//!   JPEG images from an arbitrarily fragmented byte stream
//! - fan-out: a single latest-frame slot read by the recorder and the HTTP
//!   re-broadcast at their own cadence, freshness over completeness
//!
//! The wire format is raw concatenated JPEG images; frame boundaries come
//! from the JPEG SOI/EOI markers themselves.

pub mod capture;
pub mod config;
pub mod delimiter;
pub mod distributor;
pub mod frame;
pub mod receiver;
pub mod recorder;
pub mod sender;
pub mod state;
pub mod web;

// Re-exports for convenience
pub use config::{CameraConfig, Config, ReceiverConfig, SenderConfig};
pub use delimiter::FrameDelimiter;
pub use distributor::{DistributorStats, FrameDistributor};
pub use frame::{Frame, Rotation};
pub use receiver::StreamReceiver;
pub use sender::StreamSender;
pub use state::ConnectionState;
