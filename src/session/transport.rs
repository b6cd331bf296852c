//! Transport Layer for Probe Sessions
//!
//! Abstracts the worker byte stream for testability. Provides:
//! - Transport trait: frame-level send/receive with a bounded wait
//! - StdioTransport: NDJSON over a worker's standard input/output
//! - MockTransport: in-process mock worker for unit tests

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use probe_protocol::{FrameError, RequestFrame, ResponseFrame};

use crate::mock::{MockWorker, ReplyDelay, GARBLED_LINE};
use crate::worker::WorkerHandle;

/// Frame transport between a session and a worker
pub trait Transport: Send {
    /// Send one request frame
    fn send(&mut self, frame: &RequestFrame) -> Result<(), TransportError>;

    /// Receive the next response frame, waiting at most `timeout`
    fn recv(&mut self, timeout: Duration) -> Result<ResponseFrame, TransportError>;

    /// Stop sending; the worker observes end of input
    fn close(&mut self) {}
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("worker closed the stream")]
    Closed,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame serialization error: {0}")]
    Serialization(#[from] FrameError),
}

impl TransportError {
    /// Returns true if the stream is unusable afterwards
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Timeout(_) | TransportError::Malformed(_))
    }
}

/// NDJSON transport over a worker's standard channels.
///
/// A reader thread turns the inbound stream into lines so that every
/// receive can be bounded by a timeout.
pub struct StdioTransport {
    writer: Option<Box<dyn Write + Send>>,
    lines: Receiver<io::Result<String>>,
}

impl StdioTransport {
    /// Create a transport from an outbound writer and an inbound reader
    pub fn new<W, R>(writer: W, reader: R) -> Result<Self, TransportError>
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("worker-stdout".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            if tx.send(Ok(line)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            writer: Some(Box::new(writer)),
            lines: rx,
        })
    }

    /// Wire a transport to a worker handle's standard channels
    pub fn from_handle(handle: &mut WorkerHandle) -> Result<Self, TransportError> {
        let (stdin, stdout) = handle.take_streams().ok_or(TransportError::Closed)?;
        Self::new(stdin, stdout)
    }
}

impl Transport for StdioTransport {
    fn send(&mut self, frame: &RequestFrame) -> Result<(), TransportError> {
        let line = probe_protocol::encode_line(frame)?;
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        let written = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(TransportError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn recv(&mut self, timeout: Duration) -> Result<ResponseFrame, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.lines.recv_timeout(remaining) {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Closed),
            };
            if line.trim().is_empty() {
                continue;
            }
            return probe_protocol::decode_line(&line)
                .map_err(|e| TransportError::Malformed(e.to_string()));
        }
    }

    fn close(&mut self) {
        self.writer = None;
    }
}

/// Response frame held back until its simulated arrival time
struct PendingFrame {
    /// None = never arrives
    ready_at: Option<Instant>,
    /// None = an undecodable line
    frame: Option<ResponseFrame>,
}

/// Mock transport for testing - connects directly to MockWorker in-process
pub struct MockTransport {
    worker: MockWorker,
    pending: VecDeque<PendingFrame>,
    closed: bool,
}

impl MockTransport {
    /// Create a new mock transport with a fresh mock worker
    pub fn new() -> Self {
        Self::with_worker(MockWorker::new())
    }

    /// Create a mock transport with a pre-configured worker
    pub fn with_worker(worker: MockWorker) -> Self {
        Self {
            worker,
            pending: VecDeque::new(),
            closed: false,
        }
    }

    /// Get a reference to the underlying mock worker for test configuration
    pub fn worker(&self) -> &MockWorker {
        &self.worker
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, frame: &RequestFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let reply = self.worker.handle_frame(frame);
        let ready_at = match reply.delay {
            ReplyDelay::Immediate => Some(Instant::now()),
            ReplyDelay::After(delay) => Some(Instant::now() + delay),
            ReplyDelay::Never => None,
        };
        if reply.garbled {
            self.pending.push_back(PendingFrame { ready_at, frame: None });
        }
        self.pending.extend(reply.frames.into_iter().map(|frame| PendingFrame {
            ready_at,
            frame: Some(frame),
        }));
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<ResponseFrame, TransportError> {
        let deadline = Instant::now() + timeout;
        let ready_at = match self.pending.front() {
            Some(pending) => pending.ready_at,
            None if self.closed => return Err(TransportError::Closed),
            None => None,
        };

        match ready_at {
            Some(at) if at <= deadline => {
                let wait = at.saturating_duration_since(Instant::now());
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
                match self.pending.pop_front() {
                    Some(PendingFrame { frame: Some(frame), .. }) => Ok(frame),
                    Some(PendingFrame { frame: None, .. }) => {
                        Err(TransportError::Malformed(GARBLED_LINE.to_string()))
                    }
                    None => Err(TransportError::Closed),
                }
            }
            _ => {
                thread::sleep(timeout);
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FailureConfig;
    use probe_protocol::methods;
    use probe_protocol::ResponseKind;
    use serde_json::json;

    #[test]
    fn test_mock_transport_roundtrip() {
        let mut transport = MockTransport::new();
        transport
            .send(&RequestFrame::call(1, "r1", methods::ADD, json!({"a": 1.0, "b": 2.0})))
            .unwrap();
        let frame = transport.recv(Duration::from_millis(100)).unwrap();
        assert_eq!(frame.request_id, "r1");
        assert_eq!(frame.payload, Some(json!(3.0)));
    }

    #[test]
    fn test_mock_transport_hang_times_out() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::ADD, FailureConfig::hang());
        let mut transport = MockTransport::with_worker(worker);

        transport
            .send(&RequestFrame::call(1, "r1", methods::ADD, json!({"a": 1.0, "b": 2.0})))
            .unwrap();
        let err = transport.recv(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[test]
    fn test_mock_transport_delay_within_timeout() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::VOID_METHOD, FailureConfig::delay(Duration::from_millis(10)));
        let mut transport = MockTransport::with_worker(worker);

        transport
            .send(&RequestFrame::call(1, "r1", methods::VOID_METHOD, json!({})))
            .unwrap();
        assert!(transport.recv(Duration::from_millis(1)).is_err());
        let frame = transport.recv(Duration::from_millis(500)).unwrap();
        assert_eq!(frame.kind, ResponseKind::Result);
    }

    #[test]
    fn test_mock_transport_closed() {
        let mut transport = MockTransport::new();
        transport.close();
        let err = transport
            .send(&RequestFrame::call(1, "r1", methods::VOID_METHOD, json!({})))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_stdio_transport_over_pipes() {
        let input = b"\n{\"request_id\":\"r1\",\"kind\":\"end\"}\nnot-json\n".to_vec();
        let mut transport = StdioTransport::new(io::sink(), io::Cursor::new(input)).unwrap();

        let frame = transport.recv(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.kind, ResponseKind::End);

        let err = transport.recv(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));

        let err = transport.recv(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_stdio_transport_send_after_close() {
        let mut transport = StdioTransport::new(Vec::new(), io::empty()).unwrap();
        transport.close();
        let err = transport
            .send(&RequestFrame::call(1, "r1", methods::VOID_METHOD, json!({})))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn test_mock_transport_garbled_reply_is_malformed() {
        let worker = MockWorker::new();
        worker.inject_failure(methods::ADD, FailureConfig::garbled());
        let mut transport = MockTransport::with_worker(worker);

        transport
            .send(&RequestFrame::call(1, "r1", methods::ADD, json!({"a": 1.0, "b": 2.0})))
            .unwrap();
        let err = transport.recv(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!TransportError::Timeout(Duration::from_millis(1)).is_fatal());
        assert!(TransportError::Closed.is_fatal());
    }
}
