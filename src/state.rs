//! User-visible connection status.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// Coarse connection status, surfaced in logs and the HTTP status endpoint.
/// Drives presentation only; data correctness never depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

pub type StatusTx = watch::Sender<ConnectionState>;
pub type StatusRx = watch::Receiver<ConnectionState>;

/// Creates a status channel starting in `Disconnected`.
pub fn status_channel() -> (StatusTx, StatusRx) {
    watch::channel(ConnectionState::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let (_tx, rx) = status_channel();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn display_matches_wire_casing() {
        assert_eq!(ConnectionState::Streaming.to_string(), "streaming");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
