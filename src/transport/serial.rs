//! Line-framed transport over a serial stream.
//!
//! The stream is type-erased so the same code runs over a `tokio_serial::SerialStream` on the
//! bench and over a `tokio::io::duplex` pipe in tests.

use super::{Framing, SerialSettings, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

/// Anything usable as a serial port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// [`Transport`] that frames commands and replies with fixed terminators.
pub struct LineTransport {
    label: String,
    stream: Option<BufReader<DynSerial>>,
    framing: Framing,
    timeout: Duration,
}

impl LineTransport {
    /// Wrap an already-open stream.
    pub fn new(label: impl Into<String>, stream: DynSerial, framing: Framing, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            stream: Some(BufReader::new(stream)),
            framing,
            timeout,
        }
    }

    /// Open a serial port at 8N1 with no flow control.
    ///
    /// Opening runs on the blocking pool; some USB serial drivers stall for a long time on
    /// open.
    pub async fn open_serial(path: &str, settings: &SerialSettings) -> Result<Self, TransportError> {
        let path_owned = path.to_string();
        let baud_rate = settings.baud_rate;

        let port = spawn_blocking(move || {
            tokio_serial::new(&path_owned, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| TransportError::Open {
            target: path.to_string(),
            reason: format!("open task failed: {e}"),
        })?
        .map_err(|e| TransportError::Open {
            target: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(
            path,
            Box::new(port),
            settings.framing.clone(),
            settings.timeout,
        ))
    }
}

/// Read until `received` ends with `terminator`.
///
/// Partial bytes stay in `received` if the future is dropped.
async fn read_terminated(
    stream: &mut BufReader<DynSerial>,
    terminator: &[u8],
    last: u8,
    received: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        let n = stream.read_until(last, received).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "link closed by peer",
            ));
        }
        if received.ends_with(terminator) {
            return Ok(());
        }
    }
}

#[async_trait]
impl Transport for LineTransport {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let framed = format!("{}{}", command, self.framing.write_terminator);

        stream.get_mut().write_all(framed.as_bytes()).await?;
        stream.get_mut().flush().await?;

        tracing::trace!(link = %self.label, command, "write");
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<String>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let terminator = self.framing.read_terminator.as_slice();
        let Some(&last) = terminator.last() else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty read terminator",
            )));
        };

        let mut received = Vec::new();
        let outcome = tokio::time::timeout(
            self.timeout,
            read_terminated(stream, terminator, last, &mut received),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                received.truncate(received.len() - terminator.len());
                let reply = String::from_utf8_lossy(&received).into_owned();
                tracing::trace!(link = %self.label, reply = %reply, "read");
                Ok(Some(reply))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => {
                if !received.is_empty() {
                    tracing::debug!(
                        link = %self.label,
                        discarded = received.len(),
                        "Discarding unterminated partial reply"
                    );
                }
                tracing::trace!(link = %self.label, timeout_ms = self.timeout.as_millis() as u64, "read timeout");
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("{} ({}ms timeout)", self.label, self.timeout.as_millis())
    }
}
