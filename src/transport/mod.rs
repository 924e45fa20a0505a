//! Byte-stream transport for instrument links.
//!
//! Both instruments speak line-oriented ASCII: the Keithley through a GPIB-USB controller that
//! enumerates as a serial port, the thermocouple reader through its own USB serial bridge. A
//! [`Transport`] hides the stream underneath and gives drivers four operations:
//!
//! - `write`: send one command, framed with the protocol's write terminator
//! - `read`: wait for one terminated reply, `Ok(None)` when the link timeout elapses
//! - `query`: `write` followed by `read`
//! - `close`: release the link; closing twice is a no-op
//!
//! Drivers never hold a transport directly. They hold a [`DeviceHandle`], which also encodes
//! "no link, simulate the instrument" and "no link at all" so every operation has to decide
//! what those states mean.

pub mod mock;
pub mod resolver;
pub mod serial;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub use resolver::{DeviceResolver, DeviceTarget, PortResolver};
pub use serial::{DynSerial, LineTransport, SerialPortIO};

/// Terminators used to frame commands and replies on one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    /// Appended to every command written.
    pub write_terminator: String,
    /// A reply is complete once the received bytes end with this sequence.
    pub read_terminator: Vec<u8>,
}

impl Framing {
    /// Framing with explicit terminators.
    pub fn new(write_terminator: &str, read_terminator: &str) -> Self {
        Self {
            write_terminator: write_terminator.to_string(),
            read_terminator: read_terminator.as_bytes().to_vec(),
        }
    }

    /// GPIB-USB controller: LF out, LF-terminated replies.
    pub fn gpib_controller() -> Self {
        Self::new("\n", "\n")
    }

    /// Microcontroller sketches: LF out, CR-LF-terminated replies.
    pub fn microcontroller() -> Self {
        Self::new("\n", "\r\n")
    }
}

/// Line settings used when opening a serial link.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Command and reply terminators.
    pub framing: Framing,
}

impl SerialSettings {
    /// Settings with the given baud rate and framing and a 1 s read timeout.
    pub fn new(baud_rate: u32, framing: Framing) -> Self {
        Self {
            baud_rate,
            timeout: Duration::from_secs(1),
            framing,
        }
    }

    /// Override the per-read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A request/response session over one byte-stream link.
#[async_trait]
pub trait Transport: Send {
    /// Send a command. The framing's write terminator is appended.
    async fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Wait for the next terminated reply.
    ///
    /// Returns `Ok(None)` when the link timeout elapses before the terminator arrives. The
    /// returned text has the terminator removed but is otherwise untouched.
    async fn read(&mut self) -> Result<Option<String>, TransportError>;

    /// Write `command`, then read one reply.
    async fn query(&mut self, command: &str) -> Result<Option<String>, TransportError> {
        self.write(command).await?;
        self.read().await
    }

    /// Release the link. Later calls are no-ops.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the link is still open.
    fn is_open(&self) -> bool;

    /// Short description for logs (port name, framing).
    fn describe(&self) -> String;
}

/// Observable state of a [`DeviceHandle`], without the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    /// A real link is open.
    Connected,
    /// No link; the driver simulates the instrument.
    Simulated,
    /// No link and no simulation.
    Disconnected,
}

/// The link a driver owns.
pub enum DeviceHandle {
    /// A real, open link.
    Connected(Box<dyn Transport>),
    /// No link; the driver synthesizes replies.
    Simulated,
    /// No link; operations are rejected until the driver connects again.
    Disconnected,
}

impl DeviceHandle {
    /// State without the transport.
    pub fn state(&self) -> LinkState {
        match self {
            DeviceHandle::Connected(_) => LinkState::Connected,
            DeviceHandle::Simulated => LinkState::Simulated,
            DeviceHandle::Disconnected => LinkState::Disconnected,
        }
    }

    /// Close an open link and leave the handle `Disconnected`.
    ///
    /// Simulated and already-disconnected handles are left as they are.
    pub async fn release(&mut self) {
        match std::mem::replace(self, DeviceHandle::Disconnected) {
            DeviceHandle::Connected(mut transport) => {
                let description = transport.describe();
                if let Err(e) = transport.close().await {
                    tracing::warn!(link = %description, error = %e, "Error while closing link");
                } else {
                    tracing::debug!(link = %description, "Link closed");
                }
            }
            unlinked => *self = unlinked,
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceHandle::Connected(t) => f.debug_tuple("Connected").field(&t.describe()).finish(),
            DeviceHandle::Simulated => f.write_str("Simulated"),
            DeviceHandle::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Open a link to `target`, falling back to simulation on any failure.
///
/// This never fails: an unreachable port is logged and yields [`DeviceHandle::Simulated`],
/// exactly like an explicit simulation target.
pub async fn open(target: &DeviceTarget, settings: &SerialSettings) -> DeviceHandle {
    match target {
        DeviceTarget::Simulation => {
            tracing::info!("Simulation target selected");
            DeviceHandle::Simulated
        }
        DeviceTarget::Serial(path) => match LineTransport::open_serial(path, settings).await {
            Ok(transport) => {
                tracing::info!(port = %path, baud = settings.baud_rate, "Serial link opened");
                DeviceHandle::Connected(Box::new(transport))
            }
            Err(e) => {
                tracing::warn!(port = %path, error = %e, "Could not open link. Entering simulation mode.");
                DeviceHandle::Simulated
            }
        },
    }
}
