//! Session loop
//!
//! Runs while one transport is open. Each iteration reads one frame (for
//! logging only), then services at most one queued request to completion.
//! A transport failure ends the session; reconnecting is the manager's job.

use std::sync::Arc;

use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::classify::Classifier;
use super::correlator::Correlator;
use super::manager::{LinkState, SharedStatus};
use super::request::PendingRequest;
use super::transport::Transport;
use super::ProtocolError;
use crate::event::Event;
use crate::sink::EventSink;

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// Transport failed; carries the reason reported in `SerialConnectionLost`
    Lost(String),
    /// Stop was requested or every caller handle is gone
    Stopped,
}

/// One connected period of the background unit
pub struct Session<'a> {
    link: Box<dyn Transport>,
    classifier: &'a dyn Classifier,
    sink: &'a dyn EventSink,
    requests: &'a mut UnboundedReceiver<PendingRequest>,
    cancel: &'a CancellationToken,
    status: &'a SharedStatus,
    max_attempts: u32,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        link: Box<dyn Transport>,
        classifier: &'a Arc<dyn Classifier>,
        sink: &'a Arc<dyn EventSink>,
        requests: &'a mut UnboundedReceiver<PendingRequest>,
        cancel: &'a CancellationToken,
        status: &'a SharedStatus,
        max_attempts: u32,
    ) -> Self {
        Self {
            link,
            classifier: classifier.as_ref(),
            sink: sink.as_ref(),
            requests,
            cancel,
            status,
            max_attempts,
        }
    }

    /// Run until the transport fails or a stop is requested.
    ///
    /// The transport is closed (dropped) when this returns.
    pub fn run(mut self) -> SessionEnd {
        let port = self.link.port_name().to_string();
        debug!("session: started on {}", port);

        while !self.cancel.is_cancelled() {
            let mut correlator = Correlator::new(
                self.link.as_mut(),
                self.classifier,
                self.sink,
                self.max_attempts,
            );

            if let Err(e) = correlator.read_event() {
                return self.lost(&port, e, None);
            }
            // Stop may have arrived during the read; leave the queue to the manager
            if self.cancel.is_cancelled() {
                break;
            }

            let pending = match self.requests.try_recv() {
                Ok(pending) => pending,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => break,
            };

            self.status.set_state(LinkState::ServicingRequest);
            debug!(id = %pending.id, "session: servicing {:?}", pending.request.label());
            let mut correlator = Correlator::new(
                self.link.as_mut(),
                self.classifier,
                self.sink,
                self.max_attempts,
            );
            match correlator.correlate(&pending.request) {
                Ok(outcome) => pending.resolve(outcome),
                Err(e) => return self.lost(&port, e, Some(pending)),
            }
            self.status.set_state(LinkState::Reading);
        }

        debug!("session: stopped on {}", port);
        SessionEnd::Stopped
    }

    fn lost(
        &self,
        port: &str,
        error: ProtocolError,
        in_flight: Option<PendingRequest>,
    ) -> SessionEnd {
        let reason = error.to_string();
        warn!("session: connection on {} lost: {}", port, reason);
        let event = Event::connection_lost(reason.as_str());
        self.sink.record(&event);
        if let Some(pending) = in_flight {
            pending.resolve(event);
        }
        SessionEnd::Lost(reason)
    }
}
