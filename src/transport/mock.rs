//! Scripted transport for tests
//!
//! Replays queued replies and records every command written, so driver and orchestrator
//! tests can run without hardware or an emulator task:
//! - Queued replies (`Line`, `Timeout`, `Fail`) are consumed one per `read()`
//! - An optional responder answers reads once the queue is empty
//! - A [`MockProbe`] keeps access to the call log after the transport moves into a driver

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One scripted outcome of `read()`.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// A terminated reply.
    Line(String),
    /// The link timeout elapses.
    Timeout,
    /// The underlying stream fails.
    Fail,
}

type Responder = Box<dyn FnMut(&[String]) -> MockReply + Send>;

#[derive(Default)]
struct MockState {
    writes: Vec<String>,
    pending_writes: Vec<String>,
    replies: VecDeque<MockReply>,
    responder: Option<Responder>,
    close_count: usize,
    closed: bool,
}

/// Transport that replays scripted replies.
///
/// # Example
///
/// ```
/// use hall_daq::transport::mock::{MockReply, ScriptedTransport};
/// use hall_daq::transport::Transport;
///
/// # tokio_test::block_on(async {
/// let (mut transport, probe) = ScriptedTransport::new();
/// probe.push_reply(MockReply::Line("199".into()));
/// assert_eq!(transport.query("U0X").await.unwrap().as_deref(), Some("199"));
/// assert_eq!(probe.writes(), vec!["U0X".to_string()]);
/// # })
/// ```
pub struct ScriptedTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`ScriptedTransport`].
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl ScriptedTransport {
    /// Create a transport with an empty script. Reads time out until replies are queued.
    pub fn new() -> (Self, MockProbe) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: state.clone(),
            },
            MockProbe { state },
        )
    }

    /// Create a transport whose reads are answered by `responder`.
    ///
    /// The responder receives the commands written since the previous read.
    pub fn with_responder<F>(responder: F) -> (Self, MockProbe)
    where
        F: FnMut(&[String]) -> MockReply + Send + 'static,
    {
        let (transport, probe) = Self::new();
        probe.state.lock().responder = Some(Box::new(responder));
        (transport, probe)
    }
}

impl MockProbe {
    /// Queue a reply for a later `read()`.
    pub fn push_reply(&self, reply: MockReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Every command written so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// How many times `close()` actually released the link.
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Whether the link has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Clear the call log.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.writes.push(command.to_string());
        state.pending_writes.push(command.to_string());
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<String>, TransportError> {
        let reply = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let pending = std::mem::take(&mut state.pending_writes);
            match state.replies.pop_front() {
                Some(reply) => reply,
                None => match state.responder.as_mut() {
                    Some(responder) => responder(&pending),
                    None => MockReply::Timeout,
                },
            }
        };

        match reply {
            MockReply::Line(line) => Ok(Some(line)),
            MockReply::Timeout => Ok(None),
            MockReply::Fail => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted failure",
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.close_count += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
