//! Microcontroller-based thermocouple reader.
//!
//! The reader runs a small SCPI-like sketch on a USB serial bridge. Commands end with LF and
//! replies with CR-LF. The board resets when the port opens, so the driver waits for it to
//! boot before the identification handshake.
//!
//! Unlike the Keithley, a failed handshake does not fall back to simulation: the link is
//! closed and the driver stays disconnected until the caller connects again.

use crate::error::DeviceFault;
use crate::transport::{self, DeviceHandle, DeviceTarget, Framing, LinkState, SerialSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const IDENTIFY: &str = "*IDN?";
const TEMPERATURE: &str = "THERMO:TEMP?";
const TYPE_QUERY: &str = "THERMO:TYPE?";
const MODE_QUERY: &str = "THERMO:MODE?";
const ONESHOT: &str = "ONESHOT";
const CONVERSION_STATUS: &str = "THERMO:STATUS?";
const COLD_JUNCTION: &str = "COLDJ:TEMP?";

/// Base of simulated temperatures, in °C.
const SIMULATED_ROOM_TEMPERATURE: f64 = 22.0;

/// Thermocouple junction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermocoupleType {
    /// Type T.
    T,
    /// Type K.
    K,
    /// Type J.
    J,
    /// Type M.
    M,
}

impl ThermocoupleType {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ThermocoupleType::T => "T",
            ThermocoupleType::K => "K",
            ThermocoupleType::J => "J",
            ThermocoupleType::M => "M",
        }
    }
}

impl fmt::Display for ThermocoupleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThermocoupleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T" => Ok(ThermocoupleType::T),
            "K" => Ok(ThermocoupleType::K),
            "J" => Ok(ThermocoupleType::J),
            "M" => Ok(ThermocoupleType::M),
            other => Err(format!("unknown thermocouple type '{other}'")),
        }
    }
}

/// Conversion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermocoupleMode {
    /// Convert continuously.
    Continuous,
    /// Convert once per `ONESHOT` trigger.
    Oneshot,
}

impl ThermocoupleMode {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ThermocoupleMode::Continuous => "CONTINUOUS",
            ThermocoupleMode::Oneshot => "ONESHOT",
        }
    }
}

impl fmt::Display for ThermocoupleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a temperature query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TemperatureReading {
    /// Numeric reply, in °C.
    Celsius(f64),
    /// Reply that is not a number (e.g. a fault message from the sketch).
    Raw(String),
}

impl TemperatureReading {
    /// Temperature if the reply was numeric.
    pub fn celsius(&self) -> Option<f64> {
        match self {
            TemperatureReading::Celsius(value) => Some(*value),
            TemperatureReading::Raw(_) => None,
        }
    }

    fn parse(reply: &str) -> Self {
        match reply.trim().parse::<f64>() {
            Ok(value) => TemperatureReading::Celsius(value),
            Err(_) => TemperatureReading::Raw(reply.to_string()),
        }
    }
}

impl fmt::Display for TemperatureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemperatureReading::Celsius(value) => write!(f, "{value} °C"),
            TemperatureReading::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ThermocoupleSettings {
    /// Baud rate of the USB serial bridge.
    pub baud_rate: u32,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Wait after opening the port, while the board boots.
    pub settle: Duration,
    /// Identification replies must start with this.
    pub id_prefix: String,
    /// Check the identification reply. Older sketches do not answer `*IDN?`.
    pub strict_handshake: bool,
}

impl Default for ThermocoupleSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_millis(500),
            settle: Duration::from_secs(1),
            id_prefix: "Thermocouple".to_string(),
            strict_handshake: true,
        }
    }
}

impl ThermocoupleSettings {
    fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.baud_rate, Framing::microcontroller()).with_timeout(self.timeout)
    }
}

/// Driver for the thermocouple reader.
#[derive(Debug)]
pub struct ThermocoupleDriver {
    handle: DeviceHandle,
    settings: ThermocoupleSettings,
}

impl ThermocoupleDriver {
    /// Open `target`, wait for the board to boot and check its identification.
    ///
    /// An unreachable port gives a simulated reader. A handshake mismatch closes the link and
    /// leaves the driver disconnected.
    pub async fn connect(target: &DeviceTarget, settings: ThermocoupleSettings) -> Self {
        let handle = transport::open(target, &settings.serial_settings()).await;
        Self::attach(handle, settings).await
    }

    /// Take over an already open handle and run the handshake on it.
    pub async fn attach(handle: DeviceHandle, settings: ThermocoupleSettings) -> Self {
        let mut driver = Self { handle, settings };
        driver.handshake().await;
        driver
    }

    /// A driver that simulates the reader.
    pub fn simulated(settings: ThermocoupleSettings) -> Self {
        Self {
            handle: DeviceHandle::Simulated,
            settings,
        }
    }

    /// Drop the current link and connect to `target` again.
    pub async fn reconnect(&mut self, target: &DeviceTarget) {
        self.handle.release().await;
        self.handle = transport::open(target, &self.settings.serial_settings()).await;
        self.handshake().await;
    }

    async fn handshake(&mut self) {
        if !matches!(self.handle, DeviceHandle::Connected(_)) {
            return;
        }

        tokio::time::sleep(self.settings.settle).await;

        if !self.settings.strict_handshake {
            tracing::info!("Thermocouple reader connected (handshake skipped)");
            return;
        }

        match self.query(IDENTIFY).await {
            Ok(id) if id.starts_with(&self.settings.id_prefix) => {
                tracing::info!(id = %id, "Thermocouple reader connected");
            }
            outcome => {
                let reply = match outcome {
                    Ok(id) => id,
                    Err(fault) => fault.to_string(),
                };
                tracing::warn!(
                    expected = %self.settings.id_prefix,
                    reply = %reply,
                    "Device is not a thermocouple reader. Disconnecting."
                );
                self.handle.release().await;
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

    /// Sketch name and build date.
    pub async fn identify(&mut self) -> Result<String, DeviceFault> {
        self.query(IDENTIFY).await
    }

    /// Current temperature. A non-numeric reply is returned as [`TemperatureReading::Raw`].
    pub async fn get_temperature(&mut self) -> Result<TemperatureReading, DeviceFault> {
        if self.is_simulated() {
            let value = SIMULATED_ROOM_TEMPERATURE + rand::random::<f64>();
            return Ok(TemperatureReading::Celsius(value));
        }
        let reply = self.query(TEMPERATURE).await?;
        Ok(TemperatureReading::parse(&reply))
    }

    /// Configured thermocouple type, as reported.
    pub async fn get_thermocouple_type(&mut self) -> Result<String, DeviceFault> {
        self.query(TYPE_QUERY).await
    }

    /// Select the thermocouple type.
    pub async fn set_thermocouple_type(&mut self, kind: ThermocoupleType) -> Result<(), DeviceFault> {
        self.command(&format!("THERMO:TYPE {kind}")).await
    }

    /// Conversion mode, as reported.
    pub async fn get_mode(&mut self) -> Result<String, DeviceFault> {
        self.query(MODE_QUERY).await
    }

    /// Select the conversion mode.
    pub async fn set_mode(&mut self, mode: ThermocoupleMode) -> Result<(), DeviceFault> {
        self.command(&format!("THERMO:MODE {mode}")).await
    }

    /// Start a single conversion (one-shot mode).
    pub async fn trigger_oneshot(&mut self) -> Result<(), DeviceFault> {
        self.command(ONESHOT).await
    }

    /// Conversion status, as reported.
    pub async fn get_conversion_status(&mut self) -> Result<String, DeviceFault> {
        self.query(CONVERSION_STATUS).await
    }

    /// Cold junction temperature, as reported.
    pub async fn get_cold_junction_temperature(&mut self) -> Result<String, DeviceFault> {
        self.query(COLD_JUNCTION).await
    }

    /// Close the link if one is open. Safe to call repeatedly; simulation is kept.
    pub async fn disconnect(&mut self) {
        self.handle.release().await;
    }

    async fn query(&mut self, command: &str) -> Result<String, DeviceFault> {
        match &mut self.handle {
            DeviceHandle::Connected(link) => match link.query(command).await? {
                Some(reply) => Ok(reply.trim().to_string()),
                None => Err(DeviceFault::Timeout {
                    command: command.to_string(),
                }),
            },
            DeviceHandle::Simulated => Ok(simulated_reply(command)),
            DeviceHandle::Disconnected => Err(DeviceFault::NotConnected),
        }
    }

    async fn command(&mut self, command: &str) -> Result<(), DeviceFault> {
        match &mut self.handle {
            DeviceHandle::Connected(link) => Ok(link.write(command).await?),
            DeviceHandle::Simulated => Ok(()),
            DeviceHandle::Disconnected => Err(DeviceFault::NotConnected),
        }
    }
}

fn simulated_reply(command: &str) -> String {
    match command {
        IDENTIFY => "Thermocouple reader (simulated)".to_string(),
        TYPE_QUERY => ThermocoupleType::T.to_string(),
        MODE_QUERY => ThermocoupleMode::Continuous.to_string(),
        CONVERSION_STATUS => "1".to_string(),
        COLD_JUNCTION => format!("{SIMULATED_ROOM_TEMPERATURE:.2}"),
        _ => String::new(),
    }
}
