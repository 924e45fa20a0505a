//! Error types for the instrument layer.
//!
//! Errors fall into two families:
//!
//! - **Device faults** ([`DeviceFault`]): anything that goes wrong while talking to an
//!   instrument. Drivers return these as typed results, but the acquisition loop never lets
//!   one escape: a fault becomes a NaN sample plus a log line.
//! - **Host errors** ([`AcquisitionError`], [`ConfigError`]): invalid requests from the
//!   caller or failures of the machine running the acquisition (e.g. the output file cannot
//!   be written). These are returned to the caller.
//!
//! `DaqError` aggregates everything for code (like the CLI) that just wants one error type.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Fault raised while communicating with an instrument.
///
/// The first four variants are the fault taxonomy the acquisition loop absorbs; the last two
/// are typed rejections a driver gives when asked for something it cannot do.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceFault {
    /// The link could not be opened or was lost.
    #[error("connection fault: {0}")]
    Connection(String),

    /// The instrument answered with something the protocol does not allow.
    #[error("protocol fault: {0}")]
    Protocol(String),

    /// No terminated reply arrived before the link timeout.
    #[error("timeout waiting for reply to '{command}'")]
    Timeout {
        /// Command whose reply never arrived.
        command: String,
    },

    /// A reply arrived but could not be parsed as a number.
    #[error("bad format: {raw:?}")]
    Format {
        /// Reply exactly as received (terminators stripped).
        raw: String,
    },

    /// The driver holds no usable link (handshake failed or disconnected).
    #[error("device not connected")]
    NotConnected,

    /// The operation is not available on this driver revision.
    #[error("operation '{0}' not supported by this driver revision")]
    Unsupported(&'static str),
}

/// Error from the byte-stream layer underneath the drivers.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was already released with `close()`.
    #[error("transport closed")]
    Closed,

    /// The link could not be opened.
    #[error("failed to open '{target}': {reason}")]
    Open {
        /// Resource that was being opened.
        target: String,
        /// Human readable reason.
        reason: String,
    },
}

impl From<TransportError> for DeviceFault {
    fn from(value: TransportError) -> Self {
        DeviceFault::Connection(value.to_string())
    }
}

/// Request rejected or session aborted by the acquisition orchestrator.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Neither a Keithley channel nor the thermocouple was enabled.
    #[error("no acquisition sources enabled")]
    NoSources,

    /// A channel outside the multiplexer range was requested.
    #[error("invalid channel {0} (expected 1..=8)")]
    InvalidChannel(u8),

    /// `start` was called while a session is armed or running.
    #[error("an acquisition session is already active")]
    AlreadyRunning,

    /// The thermocouple source was enabled but its driver holds no link.
    #[error("thermocouple enabled but the thermocouple reader is disconnected")]
    ThermocoupleUnavailable,

    /// The output file could not be written.
    #[error("failed to write output file {path}: {source}")]
    Output {
        /// Output file path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

/// Configuration could not be loaded or is semantically invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Parsing or merging the configuration sources failed.
    #[error("configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but make no sense.
    #[error("configuration validation error: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}

/// Crate-wide error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An instrument fault surfaced to the caller.
    #[error(transparent)]
    Device(#[from] DeviceFault),

    /// The byte-stream layer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The acquisition orchestrator rejected a request.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Host I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
