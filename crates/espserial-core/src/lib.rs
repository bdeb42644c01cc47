//! # ESPSerial Core Library
//!
//! Line-oriented UART protocol engine for ESP32/STM32-class devices.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Persistent connection to the first available of several candidate ports,
//!   with cooldown and automatic reconnection
//! - Decoding of newline-terminated ASCII frames
//! - Classification of frames into log events (`D `/`I `/`W `/`E ` prefixes)
//!   and command responses, pluggable per device family
//! - A synchronous (and async) request/response API with retry and timeout
//! - Event sinks for logging and diagnostics
//!
//! ## Example
//!
//! ```rust,ignore
//! use espserial_core::prelude::*;
//!
//! let config = InterfaceConfig::with_ports(["/dev/ttyUSB0", "/dev/ttyUSB1"]);
//! let serial = SerialInterface::open(config)?;
//!
//! let reply = serial.send("version", "v");
//! match reply.kind() {
//!     EventKind::CliResponse => println!("firmware: {}", reply.content().unwrap_or_default()),
//!     _ => println!("no answer: {}", reply),
//! }
//! ```

pub mod config;
pub mod event;
pub mod interface;
pub mod protocol;
pub mod sink;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, InterfaceConfig};
    pub use crate::event::{Event, EventKind, Message};
    pub use crate::interface::{InterfaceError, SerialInterface};
    pub use crate::protocol::{
        BaseClassifier, Classifier, Connector, EspClassifier, LinkState, LinkStatus, Matcher,
        ProtocolError, SerialRequest, Transport,
    };
    pub use crate::sink::{EventSink, FanoutSink, JsonLinesSink, MemorySink, TracingSink};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
