//! Serial Protocol Engine
//!
//! Implements the line-oriented UART protocol spoken by ESP32/STM32 firmware:
//! newline-terminated ASCII frames, one-letter severity prefixes for log
//! lines, and text commands answered by text responses.
//!
//! Layers, leaf-first: [`frame`] decoding, [`classify`]ing, request
//! [`correlator`], the [`session`] loop and the connection [`manager`].

pub mod classify;
pub mod correlator;
mod error;
pub mod frame;
pub mod manager;
pub mod request;
pub mod serial;
pub mod session;
pub mod transport;

pub use classify::{BaseClassifier, Classifier, EspClassifier};
pub use correlator::Correlator;
pub use error::ProtocolError;
pub use frame::Frame;
pub use manager::{ConnectionManager, LinkState, LinkStatus};
pub use request::{Matcher, PendingRequest, SerialRequest};
pub use serial::{list_ports, open_port, PortInfo};
pub use transport::{Connector, SerialConnector, SerialTransport, Transport};

/// Default baud rate for ESP32/STM32 consoles
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Per-read timeout on the port; bounds how long one loop iteration blocks
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default protocol timeout for a single send attempt
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1500;

/// Added to the response timeout to get the default caller-side wait
pub const CALLER_TIMEOUT_MARGIN_MS: u64 = 10_000;

/// Send attempts per request before giving up
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Cooldown between connection attempts, in ticks
pub const DEFAULT_COOLDOWN_TICKS: u32 = 10;

/// Length of one cooldown tick
pub const DEFAULT_COOLDOWN_TICK_MS: u64 = 1000;

/// Partial lines longer than this are handed to the decoder as-is
pub const MAX_LINE_LENGTH: usize = 4096;
