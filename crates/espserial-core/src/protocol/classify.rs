//! Message classification
//!
//! Turns a validated text line into a typed [`Event`]. Device families plug in
//! their own [`Classifier`]; all of them share the one-letter severity prefix
//! scheme (`D `, `I `, `W `, `E `) for unsolicited log lines.

use crate::event::{Event, EventKind};

/// Classification strategy injected into the session at construction time
pub trait Classifier: Send + Sync {
    /// Classify one decoded, trimmed, non-empty line
    fn classify(&self, line: &str) -> Event;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> Event + Send + Sync,
{
    fn classify(&self, line: &str) -> Event {
        self(line)
    }
}

/// Map a two-character severity prefix to its log event kind
pub fn severity_kind(line: &str) -> Option<EventKind> {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[1] != b' ' {
        return None;
    }
    match bytes[0] {
        b'D' => Some(EventKind::DebugEvent),
        b'I' => Some(EventKind::InfoEvent),
        b'W' => Some(EventKind::WarningEvent),
        b'E' => Some(EventKind::ErrorEvent),
        _ => None,
    }
}

/// Content carried by a classified line.
///
/// Log events keep their prefix (the whole line). Responses carry the line
/// with leading whitespace removed. Single-character lines carry nothing.
pub fn line_content(line: &str) -> &str {
    if line.len() > 1 {
        line.trim_start()
    } else {
        ""
    }
}

/// Classify with the severity scheme, falling back to `fallback` for replies
pub fn classify_with_fallback(line: &str, fallback: EventKind) -> Event {
    let kind = severity_kind(line).unwrap_or(fallback);
    Event::with_content(kind, line_content(line))
}

/// Generic classifier: anything without a severity prefix is a success response
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseClassifier;

impl Classifier for BaseClassifier {
    fn classify(&self, line: &str) -> Event {
        classify_with_fallback(line, EventKind::SuccessResponse)
    }
}

/// ESP32 console classifier: un-prefixed text (including `OK`) is a CLI response
#[derive(Debug, Clone, Copy, Default)]
pub struct EspClassifier;

impl Classifier for EspClassifier {
    fn classify(&self, line: &str) -> Event {
        classify_with_fallback(line, EventKind::CliResponse)
    }
}
