//! Event sinks
//!
//! Every decoded or synthesized [`Event`] is handed to an [`EventSink`]
//! exactly once. Sinks observe; they never influence protocol flow, must not
//! panic and should return quickly.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::event::{Event, EventKind};

/// Default number of events kept by [`MemorySink`]
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Observer for protocol events
pub trait EventSink: Send + Sync {
    /// Observe one event. Must not block for long or panic.
    fn record(&self, event: &Event);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn record(&self, event: &Event) {
        (**self).record(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn record(&self, event: &Event) {
        (**self).record(event)
    }
}

/// Closure sink
pub struct FnSink<F>(
    /// Called with every event
    pub F,
);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn record(&self, event: &Event) {
        (self.0)(event)
    }
}

/// Logs events through `tracing`, with the level following the event kind
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &Event) {
        let kind = event.kind().name();
        let ts = event.timestamp;
        match event.kind() {
            EventKind::DebugEvent | EventKind::Request => {
                tracing::debug!(kind, ts, "{}", event)
            }
            EventKind::InfoEvent
            | EventKind::SuccessResponse
            | EventKind::CliResponse
            | EventKind::SerialConnected => tracing::info!(kind, ts, "{}", event),
            EventKind::ErrorEvent
            | EventKind::SerialConnectionLost
            | EventKind::RequestHandlerTimeout => tracing::error!(kind, ts, "{}", event),
            _ => tracing::warn!(kind, ts, "{}", event),
        }
    }
}

/// Writes each event as one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Sink writing to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn record(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("JsonLinesSink: failed to serialize event: {e}");
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            tracing::warn!("JsonLinesSink: writer lock poisoned, event dropped");
            return;
        };
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            tracing::warn!("JsonLinesSink: write failed: {e}");
        }
    }
}

/// Bounded in-memory event history, oldest dropped first
pub struct MemorySink {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl MemorySink {
    /// Keep at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_SIZE))),
            capacity,
        }
    }

    /// Copy of the recorded events, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recorded events of one kind
    pub fn of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// Number of events held
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// True when no events are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all held events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
    }
}

/// Forwards every event to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    /// Sink with no targets
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target
    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn record(&self, event: &Event) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
