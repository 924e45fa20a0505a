//! # Hall DAQ
//!
//! Instrument communication and acquisition core for a Hall effect bench: a Keithley 199
//! multimeter with scanner card (behind a GPIB-USB controller) and a microcontroller
//! thermocouple reader, both on serial links.
//!
//! ## Crate Structure
//!
//! - **`transport`**: line-framed request/response links over serial streams, the
//!   `DeviceHandle` that also encodes simulated and disconnected instruments, and device
//!   identifier resolution.
//! - **`keithley`**: the multimeter protocol and the `U0X` status decoder.
//! - **`thermocouple`**: the thermocouple reader protocol.
//! - **`acquisition`**: the polling loop, its session clock, output file and row sinks.
//! - **`bench`**: connects both instruments from configuration.
//! - **`config`**: figment-based configuration.
//! - **`telemetry`**: tracing subscriber setup.
//! - **`error`**: fault and error types.
//!
//! Every device operation degrades instead of failing: an unreachable instrument is
//! simulated, and a reading that times out or cannot be parsed is recorded as NaN.

pub mod acquisition;
pub mod bench;
pub mod config;
pub mod error;
pub mod keithley;
pub mod telemetry;
pub mod thermocouple;
pub mod transport;

pub use acquisition::{AcquisitionOrchestrator, AcquisitionPlan, SessionSummary, StopHandle};
pub use bench::Bench;
pub use config::HallConfig;
pub use error::{AppResult, DaqError, DeviceFault};
