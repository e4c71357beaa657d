//! Error types for the daemon.

use rethos_core::FramingError;

/// Errors that abort the daemon. Everything else (corrupt frames, client
/// disconnects, tunnel write failures) is observed, counted, and survived.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("serial connection lost")]
    SerialClosed,
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("TUN interface setup failed: {0}")]
    Tun(std::io::Error),
    #[error("event channel closed")]
    EventChannelClosed,
}
