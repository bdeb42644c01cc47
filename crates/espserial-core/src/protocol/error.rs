//! Protocol errors

use thiserror::Error;

/// Transport-level failures.
///
/// These never reach callers directly: the background unit turns them into
/// `SerialConnectionLost` / `SerialNotConnected` events.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Driver-level failure reported by the serial port
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Port does not exist or cannot be opened
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Every candidate port failed to open
    #[error("No candidate serial port could be opened")]
    NoPortAvailable,

    /// Device hung up (a read returned end of file)
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Read or write failed on an open port
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(e.description),
            _ => ProtocolError::SerialError(e.description),
        }
    }
}
