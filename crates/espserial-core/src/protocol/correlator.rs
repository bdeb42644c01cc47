//! Request/response correlation
//!
//! Sends a request (up to `max_attempts` times) and reads frames until one
//! matches the expected variant and content. Every frame read on the way is
//! recorded in the sink once and then dropped; nothing is buffered for later.

use std::time::Instant;

use tracing::debug;

use super::classify::Classifier;
use super::frame::{self, Frame};
use super::request::SerialRequest;
use super::transport::Transport;
use super::ProtocolError;
use crate::event::Event;
use crate::sink::EventSink;

/// Borrowed view of an open link plus the decode/classify/log pipeline
pub struct Correlator<'a> {
    link: &'a mut dyn Transport,
    classifier: &'a dyn Classifier,
    sink: &'a dyn EventSink,
    max_attempts: u32,
}

impl<'a> Correlator<'a> {
    /// Correlator over `link`, sending each request at most `max_attempts` times
    pub fn new(
        link: &'a mut dyn Transport,
        classifier: &'a dyn Classifier,
        sink: &'a dyn EventSink,
        max_attempts: u32,
    ) -> Self {
        Self {
            link,
            classifier,
            sink,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Read, decode and classify one line. `Ok(None)` means the read timed out.
    pub fn read_event(&mut self) -> Result<Option<Event>, ProtocolError> {
        let raw = self.link.read_line()?;
        let event = match frame::decode(raw.as_deref()) {
            None => return Ok(None),
            Some(Frame::Text(line)) => self.classifier.classify(&line),
            Some(Frame::Invalid(event)) => event,
        };
        self.sink.record(&event);
        Ok(Some(event))
    }

    /// Run one request to completion.
    ///
    /// Always yields exactly one outcome event; `Err` only for transport failures.
    pub fn correlate(&mut self, request: &SerialRequest) -> Result<Event, ProtocolError> {
        let matched = match &request.request {
            None => {
                let deadline = Instant::now() + request.response_timeout;
                self.await_match(request, deadline)?
            }
            Some(text) if !text.is_ascii() => {
                let rejected = Event::invalid(text.as_str(), "Request not ASCII");
                self.sink.record(&rejected);
                return Ok(rejected);
            }
            Some(text) => self.send_with_retries(request, text)?,
        };

        let outcome = match matched {
            Some(event) => self.check(request, event),
            None => {
                debug!(
                    "correlate: no {} matching {} for {:?}",
                    request.expected, request.matcher, request.label()
                );
                let timeout = Event::response_timeout(request.label());
                self.sink.record(&timeout);
                timeout
            }
        };
        Ok(outcome)
    }

    fn send_with_retries(
        &mut self,
        request: &SerialRequest,
        text: &str,
    ) -> Result<Option<Event>, ProtocolError> {
        let bytes = request.to_bytes().unwrap_or_default();

        for attempt in 1..=self.max_attempts {
            self.sink.record(&Event::request(text));
            self.link.write_all(&bytes)?;
            self.link.flush()?;
            debug!(
                "correlate: sent {:?} (attempt {}/{})",
                text, attempt, self.max_attempts
            );

            let deadline = Instant::now() + request.response_timeout;
            if let Some(event) = self.await_match(request, deadline)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Read until a frame matches or `deadline` passes. At least one read is made.
    fn await_match(
        &mut self,
        request: &SerialRequest,
        deadline: Instant,
    ) -> Result<Option<Event>, ProtocolError> {
        loop {
            if let Some(event) = self.read_event()? {
                if request.is_match(&event) {
                    return Ok(Some(event));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn check(&self, request: &SerialRequest, event: Event) -> Event {
        let Some(validator) = &request.validator else {
            return event;
        };
        let verdict = (**validator)(event.content().unwrap_or_default());
        match verdict {
            Ok(()) => event,
            Err(error) => {
                let invalid = Event::invalid_response(event, error);
                self.sink.record(&invalid);
                invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Message};
    use crate::protocol::classify::EspClassifier;
    use crate::sink::MemorySink;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Link that replays scripted lines and records writes
    struct ScriptedLink {
        lines: VecDeque<Option<Vec<u8>>>,
        written: Vec<u8>,
        fail_reads: bool,
    }

    impl ScriptedLink {
        fn new(lines: &[&[u8]]) -> Self {
            Self {
                lines: lines.iter().map(|l| Some(l.to_vec())).collect(),
                written: Vec::new(),
                fail_reads: false,
            }
        }
    }

    impl Transport for ScriptedLink {
        fn port_name(&self) -> &str {
            "scripted"
        }

        fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
            if self.fail_reads {
                return Err(ProtocolError::SerialError("unplugged".into()));
            }
            match self.lines.pop_front() {
                Some(line) => Ok(line),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
            }
        }

        fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
            self.written.extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[test]
    fn test_read_event_records_each_frame() {
        let mut link = ScriptedLink::new(&[b"I hello\r\n", b"\xff\n"]);
        let sink = MemorySink::default();
        let mut correlator = Correlator::new(&mut link, &EspClassifier, &sink, 3);

        let first = correlator.read_event().unwrap().unwrap();
        assert_eq!(first.kind(), EventKind::InfoEvent);
        let second = correlator.read_event().unwrap().unwrap();
        assert_eq!(second.kind(), EventKind::Invalid);
        assert_eq!(correlator.read_event().unwrap(), None);

        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_match_skips_unrelated_frames() {
        let mut link = ScriptedLink::new(&[b"D noise\n", b"OK but not it\n", b"version 1.4\n"]);
        let sink = MemorySink::default();
        let request = SerialRequest::command("version", "version")
            .expect_kind(EventKind::CliResponse)
            .response_timeout(Duration::from_millis(200));

        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();

        assert_eq!(outcome.content(), Some("version 1.4"));
        assert_eq!(link.written, b"version\n".to_vec());
        let kinds: Vec<EventKind> = sink.snapshot().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Request,
                EventKind::DebugEvent,
                EventKind::CliResponse,
                EventKind::CliResponse,
            ]
        );
    }

    #[test]
    fn test_timeout_after_three_attempts() {
        let mut link = ScriptedLink::new(&[]);
        let sink = MemorySink::default();
        let request =
            SerialRequest::command("AT+RESET", "READY").response_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(
            outcome.message,
            Message::ResponseTimeout {
                request: "AT+RESET".to_string()
            }
        );
        assert_eq!(link.written, b"AT+RESET\nAT+RESET\nAT+RESET\n".to_vec());
        assert_eq!(sink.of_kind(EventKind::Request).len(), 3);
        assert_eq!(sink.of_kind(EventKind::ResponseTimeout).len(), 1);
    }

    #[test]
    fn test_wait_without_request_sends_nothing() {
        let mut link = ScriptedLink::new(&[b"I boot done\n"]);
        let sink = MemorySink::default();
        let request = SerialRequest::wait_for("boot")
            .expect_kind(EventKind::InfoEvent)
            .response_timeout(Duration::from_millis(100));

        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();

        assert_eq!(outcome.content(), Some("I boot done"));
        assert!(link.written.is_empty());
    }

    #[test]
    fn test_any_of_matcher() {
        let mut link = ScriptedLink::new(&[b"ERROR busy\n"]);
        let sink = MemorySink::default();
        let request = SerialRequest::command("flash", ["DONE", "ERROR"])
            .expect_kind(EventKind::CliResponse)
            .response_timeout(Duration::from_millis(100));

        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();
        assert_eq!(outcome.content(), Some("ERROR busy"));
    }

    #[test]
    fn test_validator_failure() {
        let mut link = ScriptedLink::new(&[b"temp=abc\n"]);
        let sink = MemorySink::default();
        let request = SerialRequest::command("temp", "temp=")
            .expect_kind(EventKind::CliResponse)
            .response_timeout(Duration::from_millis(100))
            .validate(|content| {
                content
                    .trim_start_matches("temp=")
                    .parse::<f32>()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            });

        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();

        match outcome.message {
            Message::InvalidSuccessResponse { message, .. } => {
                assert_eq!(message.content(), Some("temp=abc"))
            }
            other => panic!("Expected invalid response, got {:?}", other),
        }
        assert_eq!(sink.of_kind(EventKind::InvalidSuccessResponse).len(), 1);
    }

    #[test]
    fn test_non_ascii_request_not_sent() {
        let mut link = ScriptedLink::new(&[]);
        let sink = MemorySink::default();
        let request = SerialRequest::command("température", "OK");

        let outcome = Correlator::new(&mut link, &EspClassifier, &sink, 3)
            .correlate(&request)
            .unwrap();

        assert_eq!(outcome.kind(), EventKind::Invalid);
        assert!(link.written.is_empty());
    }

    #[test]
    fn test_transport_error_propagates() {
        let mut link = ScriptedLink::new(&[]);
        link.fail_reads = true;
        let sink = MemorySink::default();
        let request =
            SerialRequest::command("AT", "OK").response_timeout(Duration::from_millis(100));

        let result = Correlator::new(&mut link, &EspClassifier, &sink, 3).correlate(&request);
        assert!(matches!(result, Err(ProtocolError::SerialError(_))));
    }
}
