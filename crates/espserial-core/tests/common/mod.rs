//! Simulated device used by the integration tests

#![allow(dead_code)]

use espserial_core::protocol::{Connector, ProtocolError, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Maps one received command line to the lines the device answers with
pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

struct DeviceState {
    outbox: VecDeque<Vec<u8>>,
    received: Vec<String>,
    partial: Vec<u8>,
    unplugged: bool,
    unplug_on_write: bool,
}

/// Mock ESP32 on the other end of the UART
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
    responder: Responder,
}

impl SimDevice {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                outbox: VecDeque::new(),
                received: Vec::new(),
                partial: Vec::new(),
                unplugged: false,
                unplug_on_write: false,
            })),
            responder: Arc::new(responder),
        }
    }

    /// Device that never answers
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Queue raw bytes as the next line the device sends
    pub fn push_line(&self, bytes: &[u8]) {
        self.state.lock().unwrap().outbox.push_back(bytes.to_vec());
    }

    /// Command lines received so far
    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn unplug(&self) {
        self.state.lock().unwrap().unplugged = true;
    }

    pub fn replug(&self) {
        self.state.lock().unwrap().unplugged = false;
    }

    /// Fail (and unplug) on the next write
    pub fn unplug_on_write(&self) {
        self.state.lock().unwrap().unplug_on_write = true;
    }

    fn is_unplugged(&self) -> bool {
        self.state.lock().unwrap().unplugged
    }
}

struct SimTransport {
    port: String,
    device: SimDevice,
    read_timeout: Duration,
}

impl Transport for SimTransport {
    fn port_name(&self) -> &str {
        &self.port
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        {
            let mut state = self.device.state.lock().unwrap();
            if state.unplugged {
                return Err(ProtocolError::SerialError("device disconnected".into()));
            }
            if let Some(line) = state.outbox.pop_front() {
                return Ok(Some(line));
            }
        }
        std::thread::sleep(self.read_timeout);
        Ok(None)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.device.state.lock().unwrap();
        if state.unplug_on_write {
            state.unplug_on_write = false;
            state.unplugged = true;
        }
        if state.unplugged {
            return Err(ProtocolError::SerialError("write failed: device disconnected".into()));
        }

        state.partial.extend_from_slice(data);
        while let Some(pos) = state.partial.iter().position(|&b| b == b'\n') {
            let rest = state.partial.split_off(pos + 1);
            let line = std::mem::replace(&mut state.partial, rest);
            let command = String::from_utf8_lossy(&line).trim_end().to_string();
            for reply in (self.device.responder)(&command) {
                state.outbox.push_back(format!("{reply}\r\n").into_bytes());
            }
            state.received.push(command);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Opens simulated devices by port name
#[derive(Clone, Default)]
pub struct SimConnector {
    devices: HashMap<String, SimDevice>,
    attempts: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, port: &str, device: SimDevice) -> Self {
        self.devices.insert(port.to_string(), device);
        self
    }

    /// Ports that open() was called with, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempt_log().into_iter().map(|(port, _)| port).collect()
    }

    /// Ports that open() was called with, and when
    pub fn attempt_log(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Connector for SimConnector {
    fn open(
        &mut self,
        port: &str,
        _baud_rate: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        self.attempts
            .lock()
            .unwrap()
            .push((port.to_string(), Instant::now()));
        match self.devices.get(port) {
            Some(device) if !device.is_unplugged() => Ok(Box::new(SimTransport {
                port: port.to_string(),
                device: device.clone(),
                read_timeout,
            })),
            _ => Err(ProtocolError::PortNotFound(port.to_string())),
        }
    }

    fn discover(&self) -> Vec<String> {
        let mut ports: Vec<String> = self.devices.keys().cloned().collect();
        ports.sort();
        ports
    }
}

/// Route engine logs to the test output; set RUST_LOG to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
