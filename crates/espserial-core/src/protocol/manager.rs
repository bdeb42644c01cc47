//! Connection management
//!
//! Owns the background unit: acquires a port from the candidate list, runs a
//! [`Session`] on it and, when no port opens or the session is lost, cools
//! down before trying again. Requests arriving while disconnected are
//! answered with `SerialNotConnected` right away.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::Classifier;
use super::request::PendingRequest;
use super::session::{Session, SessionEnd};
use super::transport::{Connector, Transport};
use super::ProtocolError;
use crate::config::InterfaceConfig;
use crate::event::Event;
use crate::sink::EventSink;

/// Link state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Not started yet
    Disconnected,
    /// Trying candidate ports
    Connecting,
    /// Session open, reading unsolicited frames
    Reading,
    /// Session open, a request is in flight
    ServicingRequest,
    /// Waiting before the next connection attempt
    Cooldown,
    /// Background unit has exited
    Stopped,
}

impl LinkState {
    /// True while a session is open
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Reading | LinkState::ServicingRequest)
    }
}

/// Snapshot of the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Current state
    pub state: LinkState,
    /// Port of the current session
    pub port: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            port: None,
        }
    }
}

/// Status shared between the background unit and caller handles
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStatus(Arc<RwLock<LinkStatus>>);

impl SharedStatus {
    pub(crate) fn set_state(&self, state: LinkState) {
        if let Ok(mut status) = self.0.write() {
            status.state = state;
            if !state.is_connected() {
                status.port = None;
            }
        }
    }

    pub(crate) fn set_connected(&self, port: &str) {
        if let Ok(mut status) = self.0.write() {
            status.state = LinkState::Reading;
            status.port = Some(port.to_string());
        }
    }

    pub(crate) fn snapshot(&self) -> LinkStatus {
        self.0
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Background unit: reconnection loop around the session loop
pub struct ConnectionManager {
    config: InterfaceConfig,
    connector: Box<dyn Connector>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn EventSink>,
    requests: UnboundedReceiver<PendingRequest>,
    cancel: CancellationToken,
    status: SharedStatus,
    /// Timer driver for cooldowns
    runtime: Runtime,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: InterfaceConfig,
        connector: Box<dyn Connector>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn EventSink>,
        requests: UnboundedReceiver<PendingRequest>,
        cancel: CancellationToken,
        status: SharedStatus,
        runtime: Runtime,
    ) -> Self {
        Self {
            config,
            connector,
            classifier,
            sink,
            requests,
            cancel,
            status,
            runtime,
        }
    }

    /// Run until stopped. Never returns early on device errors.
    pub fn run(mut self) {
        info!("serial interface started");

        while !self.cancel.is_cancelled() {
            match self.connect() {
                Ok(link) => {
                    let end = Session::new(
                        link,
                        &self.classifier,
                        &self.sink,
                        &mut self.requests,
                        &self.cancel,
                        &self.status,
                        self.config.max_attempts,
                    )
                    .run();
                    if end == SessionEnd::Stopped {
                        break;
                    }
                }
                Err(e) => warn!("connect: {}", e),
            }

            if !self.cooldown() {
                break;
            }
        }

        self.drain_on_stop();
        self.status.set_state(LinkState::Stopped);
        info!("serial interface stopped");
    }

    fn candidate_ports(&self) -> Vec<String> {
        if self.config.ports.is_empty() {
            self.connector.discover()
        } else {
            self.config.ports.clone()
        }
    }

    /// Try each candidate port in order; the first that opens wins
    fn connect(&mut self) -> Result<Box<dyn Transport>, ProtocolError> {
        self.status.set_state(LinkState::Connecting);
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);

        for port in self.candidate_ports() {
            if self.cancel.is_cancelled() {
                break;
            }
            match self
                .connector
                .open(&port, self.config.baud_rate, read_timeout)
            {
                Ok(link) => {
                    info!(
                        "UART connection opened on port {} with baudrate {} and timeout {}ms",
                        port, self.config.baud_rate, self.config.read_timeout_ms
                    );
                    self.sink.record(&Event::connected(port.as_str()));
                    self.status.set_connected(&port);
                    return Ok(link);
                }
                Err(e) => debug!("connect: {} failed: {}", port, e),
            }
        }

        Err(ProtocolError::NoPortAvailable)
    }

    /// Wait `cooldown_ticks` ticks, answering queued requests as they arrive.
    ///
    /// Returns false when the manager should stop.
    fn cooldown(&mut self) -> bool {
        self.status.set_state(LinkState::Cooldown);
        let ticks = self.config.cooldown_ticks;
        let tick = Duration::from_millis(self.config.cooldown_tick_ms);
        debug!("cooldown: {} x {}ms", ticks, tick.as_millis());

        let cancel = &self.cancel;
        let sink = self.sink.as_ref();
        let requests = &mut self.requests;

        self.runtime.block_on(async move {
            let mut interval = tokio::time::interval(tick);
            // First tick of an interval fires immediately
            interval.tick().await;

            let mut elapsed = 0;
            while elapsed < ticks {
                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = interval.tick() => elapsed += 1,
                    next = requests.recv() => match next {
                        Some(pending) => reject(pending, sink),
                        None => return false,
                    },
                }
            }
            true
        })
    }

    /// Answer everything still queued so no caller waits for its own timeout
    fn drain_on_stop(&mut self) {
        self.requests.close();
        while let Ok(pending) = self.requests.try_recv() {
            reject(pending, self.sink.as_ref());
        }
    }
}

fn reject(pending: PendingRequest, sink: &dyn EventSink) {
    debug!(id = %pending.id, "no connection, rejecting {:?}", pending.request.label());
    let event = Event::not_connected();
    sink.record(&event);
    pending.resolve(event);
}
