//! Keithley 199 multimeter with scanner card, behind a GPIB-USB controller.
//!
//! The controller enumerates as a serial port and forwards plain text to the instrument. Its
//! own directives start with `++`; the one that matters here is `++read 10`, which addresses
//! the meter to talk and returns everything up to the next LF. Every logical read is preceded
//! by that directive.
//!
//! ## Protocol
//!
//! | Command | Meaning |
//! |---------|---------|
//! | `U0X` | machine status (starts with the model id) |
//! | `F0R0N{ch}X` | DC volts, autorange, scanner channel `ch` |
//! | `++read 10` | read one reply |
//! | `++llo` / `++loc` | lock / unlock the front panel |
//! | `L0XT3G5S1X` | restore the default setup |
//!
//! A reading looks like `NDCV+1.23456E-3`: a four character prefix, then the value.
//!
//! The driver never fails to construct. An unreachable port or a device that does not
//! identify as a 199 leaves it in simulation, where readings are uniform random draws after a
//! fixed delay.

pub mod status;

use crate::acquisition::clock::SessionClock;
use crate::acquisition::pump::{NoopPump, Pump};
use crate::error::DeviceFault;
use crate::transport::{
    self, DeviceHandle, DeviceTarget, Framing, LinkState, SerialSettings, Transport,
};
use std::ops::RangeInclusive;
use std::time::Duration;

pub use status::{decode, Function, Range, Rate, StatusReport};

/// Scanner channels.
pub const CHANNELS: RangeInclusive<u8> = 1..=8;

/// Controller directive issued before every read.
pub const READ_DIRECTIVE: &str = "++read 10";

const IDENTIFY: &str = "U0X";
const LOCK: &str = "++llo";
const UNLOCK: &str = "++loc";
const RESET: &str = "L0XT3G5S1X";

/// Length of the reading prefix (`NDCV`) in front of the value.
const READING_PREFIX: usize = 4;

/// Status reported while simulating: DCV, autorange, 5½ digits.
const SIMULATED_STATUS: &str = concat!("1990B0", "000000000000000", "01");

/// Optional operations that differ between driver revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeithleyCapabilities {
    /// `U0X` status query is exposed.
    pub machine_status: bool,
}

impl Default for KeithleyCapabilities {
    fn default() -> Self {
        Self {
            machine_status: true,
        }
    }
}

/// Connection and behavior settings.
#[derive(Debug, Clone)]
pub struct KeithleySettings {
    /// Baud rate of the controller's serial port.
    pub baud_rate: u32,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Model ids (first three characters of the status) accepted as a 199.
    pub accepted_models: Vec<String>,
    /// Delay before each simulated reading.
    pub simulated_delay: Duration,
    /// Optional operations.
    pub capabilities: KeithleyCapabilities,
}

impl Default for KeithleySettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_secs(3),
            accepted_models: vec!["100".to_string(), "199".to_string()],
            simulated_delay: Duration::from_millis(400),
            capabilities: KeithleyCapabilities::default(),
        }
    }
}

impl KeithleySettings {
    fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.baud_rate, Framing::gpib_controller()).with_timeout(self.timeout)
    }
}

/// Driver for one Keithley 199.
pub struct KeithleyDriver {
    handle: DeviceHandle,
    settings: KeithleySettings,
    clock: SessionClock,
    model: Option<String>,
}

impl KeithleyDriver {
    /// Open `target` and identify the instrument.
    ///
    /// Falls back to simulation when the port cannot be opened or the device does not
    /// identify as an accepted model.
    pub async fn connect(target: &DeviceTarget, settings: KeithleySettings) -> Self {
        let handle = transport::open(target, &settings.serial_settings()).await;
        Self::attach(handle, settings).await
    }

    /// Take over an existing handle, identifying the instrument if it is connected.
    pub async fn attach(handle: DeviceHandle, settings: KeithleySettings) -> Self {
        let mut driver = Self {
            handle,
            settings,
            clock: SessionClock::start(),
            model: None,
        };
        driver.identify().await;
        driver
    }

    /// A driver that simulates the instrument.
    pub fn simulated(settings: KeithleySettings) -> Self {
        Self {
            handle: DeviceHandle::Simulated,
            settings,
            clock: SessionClock::start(),
            model: None,
        }
    }

    async fn identify(&mut self) {
        let DeviceHandle::Connected(link) = &mut self.handle else {
            return;
        };

        match identify_model(link.as_mut(), &self.settings.accepted_models).await {
            Ok(model) => {
                tracing::info!(model = %model, link = %link.describe(), "Keithley identified");
                self.model = Some(model);
            }
            Err(fault) => {
                tracing::warn!(error = %fault, "Keithley did not identify. Entering simulation mode.");
                self.handle.release().await;
                self.handle = DeviceHandle::Simulated;
            }
        }
    }

    /// Link state.
    pub fn state(&self) -> LinkState {
        self.handle.state()
    }

    /// Whether readings are simulated.
    pub fn is_simulated(&self) -> bool {
        self.handle.state() == LinkState::Simulated
    }

    /// Model id of the identified instrument, `None` when simulated or closed.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Settings this driver was created with.
    pub fn settings(&self) -> &KeithleySettings {
        &self.settings
    }

    /// Replace the clock, e.g. with a fresh session origin.
    pub fn set_clock(&mut self, clock: SessionClock) {
        self.clock = clock;
    }

    /// Read the voltage on `channel`.
    ///
    /// Returns `(seconds since the clock origin, volts)`. Faults are logged and yield NaN;
    /// this never fails. The timestamp is taken after the reading arrives.
    pub async fn get_voltage(&mut self, channel: u8, pump: &mut dyn Pump) -> (f64, f64) {
        let value = match self.try_voltage(channel, pump).await {
            Ok(value) => value,
            Err(fault) => {
                match &fault {
                    DeviceFault::Timeout { .. } => {
                        tracing::error!(channel, "Timeout on channel {channel}")
                    }
                    DeviceFault::Format { raw } => {
                        tracing::error!(channel, raw = %raw, "Bad format {raw:?}")
                    }
                    other => tracing::error!(channel, error = %other, "Reading failed"),
                }
                f64::NAN
            }
        };
        (self.clock.elapsed(), value)
    }

    /// Read the voltage on `channel`, returning faults instead of NaN.
    pub async fn try_voltage(&mut self, channel: u8, pump: &mut dyn Pump) -> Result<f64, DeviceFault> {
        if !CHANNELS.contains(&channel) {
            return Err(DeviceFault::Protocol(format!(
                "channel {channel} outside {}..={}",
                CHANNELS.start(),
                CHANNELS.end()
            )));
        }

        match &mut self.handle {
            DeviceHandle::Simulated => {
                tokio::time::sleep(self.settings.simulated_delay).await;
                Ok(rand::random::<f64>())
            }
            DeviceHandle::Disconnected => Err(DeviceFault::NotConnected),
            DeviceHandle::Connected(link) => {
                let select = format!("F0R0N{channel}X");
                link.write(&select).await?;
                pump.pump().await;

                let reply = read_reply(link.as_mut(), pump, &select).await?;
                parse_reading(&reply)
            }
        }
    }

    /// Raw `U0X` status string, terminators stripped. Decode it with [`decode`].
    pub async fn machine_status(&mut self, pump: &mut dyn Pump) -> Result<String, DeviceFault> {
        if !self.settings.capabilities.machine_status {
            return Err(DeviceFault::Unsupported("machine_status"));
        }

        match &mut self.handle {
            DeviceHandle::Simulated => Ok(SIMULATED_STATUS.to_string()),
            DeviceHandle::Disconnected => Err(DeviceFault::NotConnected),
            DeviceHandle::Connected(link) => {
                link.write(IDENTIFY).await?;
                pump.pump().await;
                read_reply(link.as_mut(), pump, IDENTIFY).await
            }
        }
    }

    /// Lock the front panel.
    pub async fn lock(&mut self) -> Result<(), DeviceFault> {
        self.send(LOCK).await
    }

    /// Return control to the front panel.
    pub async fn unlock(&mut self) -> Result<(), DeviceFault> {
        self.send(UNLOCK).await
    }

    /// Restore the default setup.
    pub async fn reset(&mut self) -> Result<(), DeviceFault> {
        self.send(RESET).await
    }

    /// Release the link. Safe to call repeatedly; a simulated driver keeps simulating.
    pub async fn close(&mut self) {
        self.handle.release().await;
        self.model = None;
    }

    /// Write a command without reading a reply.
    async fn send(&mut self, command: &str) -> Result<(), DeviceFault> {
        match &mut self.handle {
            DeviceHandle::Connected(link) => Ok(link.write(command).await?),
            DeviceHandle::Simulated => {
                tracing::trace!(command, "simulated write");
                Ok(())
            }
            DeviceHandle::Disconnected => Err(DeviceFault::NotConnected),
        }
    }
}

impl std::fmt::Debug for KeithleyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeithleyDriver")
            .field("handle", &self.handle)
            .field("model", &self.model)
            .finish()
    }
}

/// Issue the read directive and wait for one reply.
///
/// `command` names the request in a timeout fault.
async fn read_reply(
    link: &mut dyn Transport,
    pump: &mut dyn Pump,
    command: &str,
) -> Result<String, DeviceFault> {
    link.write(READ_DIRECTIVE).await?;
    pump.pump().await;
    let reply = link.read().await?;
    pump.pump().await;

    match reply {
        Some(reply) => Ok(reply.trim().to_string()),
        None => Err(DeviceFault::Timeout {
            command: command.to_string(),
        }),
    }
}

/// Drain the controller, then query the model id.
async fn identify_model(link: &mut dyn Transport, accepted: &[String]) -> Result<String, DeviceFault> {
    let mut pump = NoopPump;

    // Whatever the meter buffered since power-on.
    match read_reply(link, &mut pump, READ_DIRECTIVE).await {
        Ok(stale) => tracing::debug!(stale = %stale, "Drained controller buffer"),
        Err(DeviceFault::Timeout { .. }) => tracing::debug!("Nothing to drain"),
        Err(fault) => return Err(fault),
    }

    link.write(IDENTIFY).await?;
    let reply = read_reply(link, &mut pump, IDENTIFY).await?;
    let id: String = reply.chars().take(3).collect();

    if accepted.iter().any(|model| *model == id) {
        Ok(id)
    } else {
        Err(DeviceFault::Protocol(format!(
            "unsupported model {reply:?}; only Keithley 199 is handled"
        )))
    }
}

/// Parse `NDCV+1.23456E-3` style readings.
fn parse_reading(reply: &str) -> Result<f64, DeviceFault> {
    reply
        .get(READING_PREFIX..)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .ok_or_else(|| DeviceFault::Format {
            raw: reply.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::pump::FnPump;
    use crate::transport::mock::{MockProbe, MockReply, ScriptedTransport};
    use tracing_test::traced_test;

    const STATUS_199: &str = "1990B000000000000000021";

    /// A 199 that answers status queries and reads `channel * 1 mV` on every channel.
    fn emulated_199() -> (DeviceHandle, MockProbe) {
        let (transport, probe) = ScriptedTransport::with_responder(|writes| {
            if writes.iter().any(|w| w == IDENTIFY) {
                return MockReply::Line(format!("{STATUS_199}\r"));
            }
            let channel = writes
                .iter()
                .find_map(|w| w.strip_prefix("F0R0N").and_then(|rest| rest.strip_suffix('X')))
                .and_then(|ch| ch.parse::<u32>().ok());
            match channel {
                Some(ch) => MockReply::Line(format!("NDCV+{ch}.00000E-3")),
                None => MockReply::Line("NDCV+0.00000E+0".to_string()),
            }
        });
        (DeviceHandle::Connected(Box::new(transport)), probe)
    }

    async fn connected_driver() -> (KeithleyDriver, MockProbe) {
        let (handle, probe) = emulated_199();
        let driver = KeithleyDriver::attach(handle, KeithleySettings::default()).await;
        probe.clear_writes();
        (driver, probe)
    }

    #[tokio::test]
    async fn attach_drains_then_identifies() {
        let (handle, probe) = emulated_199();
        let driver = KeithleyDriver::attach(handle, KeithleySettings::default()).await;

        assert_eq!(driver.state(), LinkState::Connected);
        assert_eq!(driver.model(), Some("199"));
        assert_eq!(
            probe.writes(),
            vec![READ_DIRECTIVE, IDENTIFY, READ_DIRECTIVE]
        );
    }

    #[tokio::test]
    async fn unknown_model_falls_back_to_simulation() {
        let (transport, probe) = ScriptedTransport::new();
        probe.push_reply(MockReply::Line("NDCV+0".into()));
        probe.push_reply(MockReply::Line("KEITHLEY 2000".into()));

        let driver =
            KeithleyDriver::attach(DeviceHandle::Connected(Box::new(transport)), KeithleySettings::default())
                .await;

        assert!(driver.is_simulated());
        assert_eq!(driver.model(), None);
        assert_eq!(probe.close_count(), 1);
    }

    #[tokio::test]
    async fn silent_device_falls_back_to_simulation() {
        let (transport, probe) = ScriptedTransport::new();
        let driver =
            KeithleyDriver::attach(DeviceHandle::Connected(Box::new(transport)), KeithleySettings::default())
                .await;

        assert!(driver.is_simulated());
        assert!(probe.is_closed());
    }

    #[tokio::test]
    async fn get_voltage_selects_channel_and_parses_reading() {
        let (mut driver, probe) = connected_driver().await;

        let (t, v) = driver.get_voltage(3, &mut NoopPump).await;
        assert!(t >= 0.0);
        assert!((v - 3.0e-3).abs() < 1e-12);
        assert_eq!(probe.writes(), vec!["F0R0N3X", READ_DIRECTIVE]);
    }

    #[tokio::test]
    async fn pump_runs_after_each_exchange() {
        let (mut driver, _probe) = connected_driver().await;
        let mut calls = 0;
        {
            let mut pump = FnPump(|| calls += 1);
            driver.get_voltage(1, &mut pump).await;
        }
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn timeout_yields_nan_and_logs() {
        let (transport, probe) = ScriptedTransport::new();
        let mut driver = KeithleyDriver {
            handle: DeviceHandle::Connected(Box::new(transport)),
            settings: KeithleySettings::default(),
            clock: SessionClock::start(),
            model: Some("199".into()),
        };
        probe.push_reply(MockReply::Timeout);

        let (_, v) = driver.get_voltage(2, &mut NoopPump).await;
        assert!(v.is_nan());
        assert!(logs_contain("Timeout on channel 2"));
    }

    #[tokio::test]
    async fn malformed_readings_are_format_faults() {
        for raw in ["", "ND", "NDCV", "NDCV+abc", "NDCVOVERFLOW"] {
            let (transport, probe) = ScriptedTransport::new();
            probe.push_reply(MockReply::Line(raw.to_string()));
            let mut driver = KeithleyDriver {
                handle: DeviceHandle::Connected(Box::new(transport)),
                settings: KeithleySettings::default(),
                clock: SessionClock::start(),
                model: Some("199".into()),
            };

            let result = driver.try_voltage(1, &mut NoopPump).await;
            assert_eq!(
                result,
                Err(DeviceFault::Format {
                    raw: raw.to_string()
                }),
                "reply {raw:?}"
            );
        }
    }

    #[tokio::test]
    async fn broken_link_yields_nan() {
        let (transport, probe) = ScriptedTransport::new();
        probe.push_reply(MockReply::Fail);
        let mut driver = KeithleyDriver {
            handle: DeviceHandle::Connected(Box::new(transport)),
            settings: KeithleySettings::default(),
            clock: SessionClock::start(),
            model: Some("199".into()),
        };

        let (_, v) = driver.get_voltage(1, &mut NoopPump).await;
        assert!(v.is_nan());
    }

    #[tokio::test]
    async fn out_of_range_channel_is_rejected_without_io() {
        let (mut driver, probe) = connected_driver().await;

        assert!(matches!(
            driver.try_voltage(9, &mut NoopPump).await,
            Err(DeviceFault::Protocol(_))
        ));
        let (_, v) = driver.get_voltage(0, &mut NoopPump).await;
        assert!(v.is_nan());
        assert!(probe.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_reading_takes_delay() {
        let mut driver = KeithleyDriver::simulated(KeithleySettings::default());
        let start = tokio::time::Instant::now();

        let (t, v) = driver.get_voltage(1, &mut NoopPump).await;

        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400) && waited < Duration::from_millis(410));
        assert!((0.0..1.0).contains(&v));
        assert!(t >= 0.4);
    }

    #[tokio::test]
    async fn status_query_and_capability() {
        let (mut driver, probe) = connected_driver().await;
        let raw = driver.machine_status(&mut NoopPump).await.unwrap();
        assert_eq!(raw, STATUS_199);
        assert_eq!(probe.writes(), vec![IDENTIFY, READ_DIRECTIVE]);

        let settings = KeithleySettings {
            capabilities: KeithleyCapabilities {
                machine_status: false,
            },
            ..KeithleySettings::default()
        };
        let mut legacy = KeithleyDriver::simulated(settings);
        assert_eq!(
            legacy.machine_status(&mut NoopPump).await,
            Err(DeviceFault::Unsupported("machine_status"))
        );
    }

    #[tokio::test]
    async fn simulated_status_decodes() {
        let mut driver = KeithleyDriver::simulated(KeithleySettings::default());
        let report = decode(&driver.machine_status(&mut NoopPump).await.unwrap());
        assert_eq!(report.id, "199");
        assert_eq!(report.function, Function::DCV);
        assert_eq!(report.range, Range::Auto);
        assert_eq!(report.rate, Rate::Digits5_5);
    }

    #[tokio::test]
    async fn panel_commands_are_fire_and_forget() {
        let (mut driver, probe) = connected_driver().await;
        driver.lock().await.unwrap();
        driver.unlock().await.unwrap();
        driver.reset().await.unwrap();
        assert_eq!(probe.writes(), vec![LOCK, UNLOCK, RESET]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_keeps_simulation() {
        let mut driver = KeithleyDriver::simulated(KeithleySettings::default());
        driver.close().await;

        assert_eq!(driver.state(), LinkState::Simulated);
        let (_, v) = driver.get_voltage(1, &mut NoopPump).await;
        assert!((0.0..1.0).contains(&v));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut driver, probe) = connected_driver().await;
        driver.close().await;
        driver.close().await;

        assert_eq!(driver.state(), LinkState::Disconnected);
        assert_eq!(probe.close_count(), 1);
        assert_eq!(driver.unlock().await, Err(DeviceFault::NotConnected));
        let (_, v) = driver.get_voltage(1, &mut NoopPump).await;
        assert!(v.is_nan());
    }
}
