//! Requests
//!
//! A [`SerialRequest`] describes a text command (or a pure wait) together with
//! the response that completes it. Once queued it becomes a [`PendingRequest`]
//! owned by the background unit until exactly one outcome is sent back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::{CALLER_TIMEOUT_MARGIN_MS, DEFAULT_RESPONSE_TIMEOUT_MS};
use crate::event::{Event, EventKind};

/// Expected response content, matched by case-sensitive substring containment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Content must contain this text
    Contains(String),
    /// Content must contain at least one of these
    AnyOf(Vec<String>),
}

impl Matcher {
    /// Check response content against this matcher
    pub fn matches(&self, content: &str) -> bool {
        match self {
            Matcher::Contains(needle) => content.contains(needle.as_str()),
            Matcher::AnyOf(needles) => needles.iter().any(|n| content.contains(n.as_str())),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Contains(needle) => write!(f, "{:?}", needle),
            Matcher::AnyOf(needles) => write!(f, "any of {:?}", needles),
        }
    }
}

impl From<&str> for Matcher {
    fn from(s: &str) -> Self {
        Matcher::Contains(s.to_string())
    }
}

impl From<String> for Matcher {
    fn from(s: String) -> Self {
        Matcher::Contains(s)
    }
}

impl From<Vec<String>> for Matcher {
    fn from(v: Vec<String>) -> Self {
        Matcher::AnyOf(v)
    }
}

impl From<Vec<&str>> for Matcher {
    fn from(v: Vec<&str>) -> Self {
        Matcher::AnyOf(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Matcher {
    fn from(v: [&str; N]) -> Self {
        Matcher::AnyOf(v.iter().map(|s| s.to_string()).collect())
    }
}

/// Secondary check applied to a matched response's content
pub type Validator = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// A request as built by the caller
#[derive(Clone)]
pub struct SerialRequest {
    /// Text to send; `None` waits for an unsolicited event instead
    pub request: Option<String>,
    /// Content the response must contain
    pub matcher: Matcher,
    /// Variant the response must have
    pub expected: EventKind,
    /// Protocol timeout for each send attempt
    pub response_timeout: Duration,
    /// How long the caller waits overall. If None, uses response timeout + 10s
    pub caller_timeout: Option<Duration>,
    /// Optional secondary check on the matched response
    pub validator: Option<Validator>,
}

impl fmt::Debug for SerialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialRequest")
            .field("request", &self.request)
            .field("matcher", &self.matcher)
            .field("expected", &self.expected)
            .field("response_timeout", &self.response_timeout)
            .field("caller_timeout", &self.caller_timeout)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl SerialRequest {
    fn new(request: Option<String>, matcher: Matcher) -> Self {
        Self {
            request,
            matcher,
            expected: EventKind::SuccessResponse,
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            caller_timeout: None,
            validator: None,
        }
    }

    /// Send `command` and wait for a success response containing `matcher`
    pub fn command(command: impl Into<String>, matcher: impl Into<Matcher>) -> Self {
        Self::new(Some(command.into()), matcher.into())
    }

    /// Send nothing; wait for a matching unsolicited event
    pub fn wait_for(matcher: impl Into<Matcher>) -> Self {
        Self::new(None, matcher.into())
    }

    /// Replace the expected content
    pub fn expect(mut self, matcher: impl Into<Matcher>) -> Self {
        self.matcher = matcher.into();
        self
    }

    /// Replace the expected response variant
    pub fn expect_kind(mut self, kind: EventKind) -> Self {
        self.expected = kind;
        self
    }

    /// Protocol timeout for each send attempt
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Fixed caller-side wait, replacing response timeout + margin
    pub fn caller_timeout(mut self, timeout: Duration) -> Self {
        self.caller_timeout = Some(timeout);
        self
    }

    /// Run `check` on the matched response's content; an `Err` turns the
    /// outcome into `InvalidSuccessResponseMessage`.
    pub fn validate<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    /// Effective caller-side wait with the default margin
    pub fn effective_caller_timeout(&self) -> Duration {
        self.caller_timeout_with_margin(Duration::from_millis(CALLER_TIMEOUT_MARGIN_MS))
    }

    /// Explicit caller timeout, or response timeout + `margin`
    pub fn caller_timeout_with_margin(&self, margin: Duration) -> Duration {
        self.caller_timeout
            .unwrap_or(self.response_timeout + margin)
    }

    /// Request text as sent on the wire, if any
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        self.request.as_ref().map(|text| {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(b'\n');
            bytes
        })
    }

    /// Label used in timeout events and logs
    pub fn label(&self) -> &str {
        self.request.as_deref().unwrap_or("")
    }

    /// Check a classified event against the expected variant and content
    pub fn is_match(&self, event: &Event) -> bool {
        event.kind() == self.expected
            && event
                .content()
                .map(|content| self.matcher.matches(content))
                .unwrap_or(false)
    }
}

/// A queued request with its reply channel
pub struct PendingRequest {
    /// Correlation id used in logs
    pub id: Uuid,
    /// What to send and wait for
    pub request: SerialRequest,
    reply: oneshot::Sender<Event>,
}

impl PendingRequest {
    /// Pair a request with the receiver its outcome will arrive on
    pub fn new(request: SerialRequest) -> (Self, oneshot::Receiver<Event>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            id: Uuid::new_v4(),
            request,
            reply: tx,
        };
        (pending, rx)
    }

    /// Deliver the outcome. A caller that already gave up is ignored.
    pub fn resolve(self, outcome: Event) {
        if self.reply.send(outcome).is_err() {
            tracing::debug!(id = %self.id, "caller no longer waiting, outcome discarded");
        }
    }
}
