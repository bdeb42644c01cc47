//! Protocol events
//!
//! Every occurrence on the link (a decoded line, a sent request, a timeout,
//! a connection change) is represented as a timestamped [`Event`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time in seconds since the UNIX epoch
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A timestamped protocol event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Seconds since the UNIX epoch, taken when the event was created
    pub timestamp: f64,

    /// What happened
    #[serde(flatten)]
    pub message: Message,
}

/// Event payload, tagged by its wire name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// A command about to be sent to the device
    #[serde(rename = "RequestMessage")]
    Request {
        /// Command text, without terminator
        request: String,
    },

    /// Generic device reply
    #[serde(rename = "SuccessResponseMessage")]
    SuccessResponse {
        /// Reply text
        content: String,
    },

    /// Device reply signalling failure
    #[serde(rename = "FailResponseMessage")]
    FailResponse {
        /// Reply text
        content: String,
    },

    /// Command-line reply from an ESP32 console
    #[serde(rename = "CLIResponseMessage")]
    CliResponse {
        /// Reply text
        content: String,
    },

    /// `D ` log line
    #[serde(rename = "DebugEventMessage")]
    DebugEvent {
        /// Full line, prefix included
        content: String,
    },

    /// `I ` log line
    #[serde(rename = "InfoEventMessage")]
    InfoEvent {
        /// Full line, prefix included
        content: String,
    },

    /// `W ` log line
    #[serde(rename = "WarningEventMessage")]
    WarningEvent {
        /// Full line, prefix included
        content: String,
    },

    /// `E ` log line
    #[serde(rename = "ErrorEventMessage")]
    ErrorEvent {
        /// Full line, prefix included
        content: String,
    },

    /// Valid line without a recognized shape
    #[serde(rename = "UnknownMessage")]
    Unknown {
        /// The line
        content: String,
    },

    /// Line that failed low-level validation
    #[serde(rename = "InvalidMessage")]
    Invalid {
        /// Hex dump of the offending bytes (or the rejected request text)
        content: String,
        /// What was wrong
        error: String,
    },

    /// Matched response that failed a secondary check
    #[serde(rename = "InvalidSuccessResponseMessage")]
    InvalidSuccessResponse {
        /// The response that matched
        message: Box<Event>,
        /// Validator's reason
        error: String,
    },

    /// No matching response before the protocol timeout
    ResponseTimeout {
        /// Request text; empty for a pure wait
        request: String,
    },

    /// The caller stopped waiting before the background unit replied
    RequestHandlerTimeout {
        /// Request text; empty for a pure wait
        request: String,
    },

    /// A port was opened and a session started
    SerialConnected {
        /// Port name
        port: String,
    },

    /// The open port failed and the session ended
    SerialConnectionLost {
        /// Transport error text
        reason: String,
    },

    /// No session was open to service the request
    SerialNotConnected {},
}

/// Fieldless discriminant of [`Message`], used to name an expected response type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// [`Message::Request`]
    Request,
    /// [`Message::SuccessResponse`]
    SuccessResponse,
    /// [`Message::FailResponse`]
    FailResponse,
    /// [`Message::CliResponse`]
    CliResponse,
    /// [`Message::DebugEvent`]
    DebugEvent,
    /// [`Message::InfoEvent`]
    InfoEvent,
    /// [`Message::WarningEvent`]
    WarningEvent,
    /// [`Message::ErrorEvent`]
    ErrorEvent,
    /// [`Message::Unknown`]
    Unknown,
    /// [`Message::Invalid`]
    Invalid,
    /// [`Message::InvalidSuccessResponse`]
    InvalidSuccessResponse,
    /// [`Message::ResponseTimeout`]
    ResponseTimeout,
    /// [`Message::RequestHandlerTimeout`]
    RequestHandlerTimeout,
    /// [`Message::SerialConnected`]
    SerialConnected,
    /// [`Message::SerialConnectionLost`]
    SerialConnectionLost,
    /// [`Message::SerialNotConnected`]
    SerialNotConnected,
}

impl EventKind {
    /// Wire name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Request => "RequestMessage",
            EventKind::SuccessResponse => "SuccessResponseMessage",
            EventKind::FailResponse => "FailResponseMessage",
            EventKind::CliResponse => "CLIResponseMessage",
            EventKind::DebugEvent => "DebugEventMessage",
            EventKind::InfoEvent => "InfoEventMessage",
            EventKind::WarningEvent => "WarningEventMessage",
            EventKind::ErrorEvent => "ErrorEventMessage",
            EventKind::Unknown => "UnknownMessage",
            EventKind::Invalid => "InvalidMessage",
            EventKind::InvalidSuccessResponse => "InvalidSuccessResponseMessage",
            EventKind::ResponseTimeout => "ResponseTimeout",
            EventKind::RequestHandlerTimeout => "RequestHandlerTimeout",
            EventKind::SerialConnected => "SerialConnected",
            EventKind::SerialConnectionLost => "SerialConnectionLost",
            EventKind::SerialNotConnected => "SerialNotConnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Event {
    /// Stamp a message with the current time
    pub fn new(message: Message) -> Self {
        Self {
            timestamp: now_seconds(),
            message,
        }
    }

    /// Build a content-carrying event of the given kind.
    ///
    /// Kinds without a `content` field fall back to [`Message::Unknown`].
    pub fn with_content(kind: EventKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let message = match kind {
            EventKind::SuccessResponse => Message::SuccessResponse { content },
            EventKind::FailResponse => Message::FailResponse { content },
            EventKind::CliResponse => Message::CliResponse { content },
            EventKind::DebugEvent => Message::DebugEvent { content },
            EventKind::InfoEvent => Message::InfoEvent { content },
            EventKind::WarningEvent => Message::WarningEvent { content },
            EventKind::ErrorEvent => Message::ErrorEvent { content },
            _ => Message::Unknown { content },
        };
        Self::new(message)
    }

    /// Request about to be sent
    pub fn request(request: impl Into<String>) -> Self {
        Self::new(Message::Request {
            request: request.into(),
        })
    }

    /// Frame or request rejected with `error`
    pub fn invalid(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(Message::Invalid {
            content: content.into(),
            error: error.into(),
        })
    }

    /// Matched response `message` rejected by a validator
    pub fn invalid_response(message: Event, error: impl Into<String>) -> Self {
        Self::new(Message::InvalidSuccessResponse {
            message: Box::new(message),
            error: error.into(),
        })
    }

    /// No match within the protocol timeout
    pub fn response_timeout(request: impl Into<String>) -> Self {
        Self::new(Message::ResponseTimeout {
            request: request.into(),
        })
    }

    /// Caller gave up waiting
    pub fn handler_timeout(request: impl Into<String>) -> Self {
        Self::new(Message::RequestHandlerTimeout {
            request: request.into(),
        })
    }

    /// Session opened on `port`
    pub fn connected(port: impl Into<String>) -> Self {
        Self::new(Message::SerialConnected { port: port.into() })
    }

    /// Session ended by a transport failure
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::new(Message::SerialConnectionLost {
            reason: reason.into(),
        })
    }

    /// Request arrived while no session was open
    pub fn not_connected() -> Self {
        Self::new(Message::SerialNotConnected {})
    }

    /// Discriminant of this event
    pub fn kind(&self) -> EventKind {
        match &self.message {
            Message::Request { .. } => EventKind::Request,
            Message::SuccessResponse { .. } => EventKind::SuccessResponse,
            Message::FailResponse { .. } => EventKind::FailResponse,
            Message::CliResponse { .. } => EventKind::CliResponse,
            Message::DebugEvent { .. } => EventKind::DebugEvent,
            Message::InfoEvent { .. } => EventKind::InfoEvent,
            Message::WarningEvent { .. } => EventKind::WarningEvent,
            Message::ErrorEvent { .. } => EventKind::ErrorEvent,
            Message::Unknown { .. } => EventKind::Unknown,
            Message::Invalid { .. } => EventKind::Invalid,
            Message::InvalidSuccessResponse { .. } => EventKind::InvalidSuccessResponse,
            Message::ResponseTimeout { .. } => EventKind::ResponseTimeout,
            Message::RequestHandlerTimeout { .. } => EventKind::RequestHandlerTimeout,
            Message::SerialConnected { .. } => EventKind::SerialConnected,
            Message::SerialConnectionLost { .. } => EventKind::SerialConnectionLost,
            Message::SerialNotConnected {} => EventKind::SerialNotConnected,
        }
    }

    /// Text content, for variants that carry one
    pub fn content(&self) -> Option<&str> {
        match &self.message {
            Message::SuccessResponse { content }
            | Message::FailResponse { content }
            | Message::CliResponse { content }
            | Message::DebugEvent { content }
            | Message::InfoEvent { content }
            | Message::WarningEvent { content }
            | Message::ErrorEvent { content }
            | Message::Unknown { content }
            | Message::Invalid { content, .. } => Some(content),
            _ => None,
        }
    }

    /// True for unsolicited device log lines
    pub fn is_log(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::DebugEvent
                | EventKind::InfoEvent
                | EventKind::WarningEvent
                | EventKind::ErrorEvent
        )
    }

    /// True for outcomes that mean the request did not get a usable answer
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::ResponseTimeout
                | EventKind::RequestHandlerTimeout
                | EventKind::SerialNotConnected
                | EventKind::SerialConnectionLost
                | EventKind::InvalidSuccessResponse
                | EventKind::Invalid
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}] {}", self.timestamp, self.kind())?;
        match &self.message {
            Message::Request { request }
            | Message::ResponseTimeout { request }
            | Message::RequestHandlerTimeout { request } => write!(f, " {request:?}"),
            Message::Invalid { content, error } => write!(f, " {error}: {content:?}"),
            Message::InvalidSuccessResponse { message, error } => {
                write!(f, " {error}: {:?}", message.content().unwrap_or_default())
            }
            Message::SerialConnected { port } => write!(f, " {port}"),
            Message::SerialConnectionLost { reason } => write!(f, " {reason}"),
            Message::SerialNotConnected {} => Ok(()),
            _ => write!(f, " {:?}", self.content().unwrap_or_default()),
        }
    }
}
