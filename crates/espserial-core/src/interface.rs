//! Serial interface handle
//!
//! [`SerialInterface`] starts the background unit on its own thread and hands
//! out the caller-facing request API. Callers never touch the port; they queue
//! a [`SerialRequest`] and wait for the single outcome event.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, InterfaceConfig};
use crate::event::{Event, EventKind};
use crate::protocol::manager::SharedStatus;
use crate::protocol::{
    Classifier, ConnectionManager, Connector, EspClassifier, LinkState, LinkStatus, Matcher,
    PendingRequest, SerialConnector, SerialRequest,
};
use crate::sink::{EventSink, TracingSink};

/// Errors that can occur while starting an interface
#[derive(Error, Debug)]
pub enum InterfaceError {
    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Tokio runtime could not be built
    #[error("Failed to build timer runtime: {0}")]
    Runtime(std::io::Error),

    /// Worker thread could not be spawned
    #[error("Failed to spawn serial worker thread: {0}")]
    Spawn(std::io::Error),
}

fn timer_runtime() -> Result<Runtime, InterfaceError> {
    Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(InterfaceError::Runtime)
}

/// Handle to a running serial interface
pub struct SerialInterface {
    requests: UnboundedSender<PendingRequest>,
    cancel: CancellationToken,
    status: SharedStatus,
    sink: Arc<dyn EventSink>,
    response_timeout: Duration,
    caller_margin: Duration,
    /// Response variant expected by [`SerialInterface::send`]
    reply_kind: EventKind,
    /// Drives blocking waits in [`SerialInterface::request`]
    runtime: Option<Runtime>,
    worker: Option<JoinHandle<()>>,
}

impl SerialInterface {
    /// Open real serial ports with the ESP32 classifier, logging through `tracing`
    pub fn open(config: InterfaceConfig) -> Result<Self, InterfaceError> {
        let connector = SerialConnector::new(config.max_line_length);
        Ok(Self::start(config, connector, EspClassifier, TracingSink)?
            .with_reply_kind(EventKind::CliResponse))
    }

    /// Start the background unit with explicit collaborators
    pub fn start<C, K, S>(
        config: InterfaceConfig,
        connector: C,
        classifier: K,
        sink: S,
    ) -> Result<Self, InterfaceError>
    where
        C: Connector + 'static,
        K: Classifier + 'static,
        S: EventSink + 'static,
    {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let status = SharedStatus::default();
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        let classifier: Arc<dyn Classifier> = Arc::new(classifier);

        let response_timeout = config.response_timeout();
        let caller_margin = config.caller_timeout_margin();

        let manager = ConnectionManager::new(
            config,
            Box::new(connector),
            classifier,
            sink.clone(),
            rx,
            cancel.clone(),
            status.clone(),
            timer_runtime()?,
        );
        let caller_runtime = timer_runtime()?;

        let worker = thread::Builder::new()
            .name("serial-interface".to_string())
            .spawn(move || manager.run())
            .map_err(InterfaceError::Spawn)?;

        Ok(Self {
            requests: tx,
            cancel,
            status,
            sink,
            response_timeout,
            caller_margin,
            reply_kind: EventKind::SuccessResponse,
            runtime: Some(caller_runtime),
            worker: Some(worker),
        })
    }

    /// Response variant [`SerialInterface::send`] waits for
    pub fn with_reply_kind(mut self, kind: EventKind) -> Self {
        self.reply_kind = kind;
        self
    }

    /// Queue a request and block until its outcome or the caller timeout.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`SerialInterface::request_async`] there.
    pub fn request(&self, request: SerialRequest) -> Event {
        match &self.runtime {
            Some(runtime) => runtime.block_on(self.request_async(request)),
            None => Event::not_connected(),
        }
    }

    /// Queue a request and await its outcome or the caller timeout
    pub async fn request_async(&self, request: SerialRequest) -> Event {
        let caller_timeout = request.caller_timeout_with_margin(self.caller_margin);
        let label = request.label().to_string();
        let (pending, reply) = PendingRequest::new(request);

        if self.requests.send(pending).is_err() {
            // Background unit has already exited
            return self.record(Event::not_connected());
        }

        match tokio::time::timeout(caller_timeout, reply).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => self.record(Event::not_connected()),
            Err(_) => {
                tracing::error!(
                    "request {:?}: no outcome within {}ms",
                    label,
                    caller_timeout.as_millis()
                );
                self.record(Event::handler_timeout(label))
            }
        }
    }

    /// Send `command` and wait for a reply containing `matcher`, using the
    /// configured response timeout
    pub fn send(&self, command: impl Into<String>, matcher: impl Into<Matcher>) -> Event {
        self.request(
            SerialRequest::command(command, matcher)
                .expect_kind(self.reply_kind)
                .response_timeout(self.response_timeout),
        )
    }

    /// Wait for an unsolicited event of `kind` containing `matcher`
    pub fn wait_for(
        &self,
        matcher: impl Into<Matcher>,
        kind: EventKind,
        timeout: Duration,
    ) -> Event {
        self.request(
            SerialRequest::wait_for(matcher)
                .expect_kind(kind)
                .response_timeout(timeout),
        )
    }

    /// Snapshot of state and port
    pub fn status(&self) -> LinkStatus {
        self.status.snapshot()
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.status.snapshot().state
    }

    /// True while a session is open
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Port of the current session, if connected
    pub fn connected_port(&self) -> Option<String> {
        self.status.snapshot().port
    }

    /// Ask the background unit to stop. In-flight reads and writes finish first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the background unit to exit
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("serial worker thread panicked");
            }
        }
    }

    fn record(&self, event: Event) -> Event {
        self.sink.record(&event);
        event
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.stop();
        // May be dropped inside another runtime, where a plain drop would panic
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
