//! Configuration loading with figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults (everything simulated)
//! 2. a TOML file (`config/hall_daq.toml` unless another path is given)
//! 3. environment variables prefixed with `HALL_DAQ_`, nested with `__`
//!    (e.g. `HALL_DAQ_KEITHLEY__DEVICE=ASRL3::INSTR`)
//!
//! Durations are written in humantime form: `"500ms"`, `"1s"`.
//!
//! # Example
//! ```no_run
//! use hall_daq::config::HallConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HallConfig::load()?;
//! println!("Keithley on {}", config.keithley.device);
//! # Ok(())
//! # }
//! ```

use crate::acquisition::AcquisitionPlan;
use crate::error::ConfigError;
use crate::keithley::{self, KeithleyCapabilities, KeithleySettings};
use crate::telemetry::{self, OutputFormat};
use crate::thermocouple::{ThermocoupleMode, ThermocoupleSettings, ThermocoupleType};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/hall_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HALL_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HallConfig {
    /// Application settings.
    pub application: ApplicationConfig,
    /// Keithley multimeter.
    pub keithley: KeithleyConfig,
    /// Thermocouple reader.
    pub thermocouple: ThermocoupleConfig,
    /// Default session plan.
    pub acquisition: AcquisitionConfig,
}

/// Application-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log line format.
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Hall DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Keithley connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeithleyConfig {
    /// Device identifier (`ASRL3::INSTR`, `/dev/ttyUSB0`, `Simulation`, ...).
    pub device: String,
    /// Baud rate of the GPIB-USB controller.
    pub baud_rate: u32,
    /// Per-read timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Accepted model ids.
    pub accepted_models: Vec<String>,
    /// Expose the `U0X` status query.
    pub machine_status: bool,
    /// Unlock the front panel when a session ends.
    pub unlock_on_stop: bool,
    /// Delay of each simulated reading.
    #[serde(with = "humantime_serde")]
    pub simulated_delay: Duration,
}

impl Default for KeithleyConfig {
    fn default() -> Self {
        let settings = KeithleySettings::default();
        Self {
            device: "Simulation".to_string(),
            baud_rate: settings.baud_rate,
            timeout: settings.timeout,
            accepted_models: settings.accepted_models,
            machine_status: settings.capabilities.machine_status,
            unlock_on_stop: true,
            simulated_delay: settings.simulated_delay,
        }
    }
}

impl KeithleyConfig {
    /// Driver settings.
    pub fn settings(&self) -> KeithleySettings {
        KeithleySettings {
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            accepted_models: self.accepted_models.clone(),
            simulated_delay: self.simulated_delay,
            capabilities: KeithleyCapabilities {
                machine_status: self.machine_status,
            },
        }
    }
}

/// Thermocouple reader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermocoupleConfig {
    /// Serial port, or `Simulation`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Wait after opening the port.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Expected identification prefix.
    pub id_prefix: String,
    /// Check the identification reply.
    pub strict_handshake: bool,
    /// Junction type applied on connect.
    pub thermocouple_type: ThermocoupleType,
    /// Conversion mode applied on connect.
    pub mode: ThermocoupleMode,
}

impl Default for ThermocoupleConfig {
    fn default() -> Self {
        let settings = ThermocoupleSettings::default();
        Self {
            port: "Simulation".to_string(),
            baud_rate: settings.baud_rate,
            timeout: settings.timeout,
            settle: settings.settle,
            id_prefix: settings.id_prefix,
            strict_handshake: settings.strict_handshake,
            thermocouple_type: ThermocoupleType::T,
            mode: ThermocoupleMode::Continuous,
        }
    }
}

impl ThermocoupleConfig {
    /// Driver settings.
    pub fn settings(&self) -> ThermocoupleSettings {
        ThermocoupleSettings {
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            settle: self.settle,
            id_prefix: self.id_prefix.clone(),
            strict_handshake: self.strict_handshake,
        }
    }
}

/// Default session plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Keithley channels.
    pub channels: Vec<u8>,
    /// Record the thermocouple.
    pub thermocouple: bool,
    /// Output file.
    pub output: PathBuf,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channels: vec![1],
            thermocouple: false,
            output: PathBuf::from("hall_data.csv"),
        }
    }
}

impl HallConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The merged provider chain, before extraction.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(HallConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        telemetry::parse_log_level(&self.application.log_level).map_err(ConfigError::Invalid)?;

        if let Some(bad) = self
            .acquisition
            .channels
            .iter()
            .find(|ch| !keithley::CHANNELS.contains(ch))
        {
            return Err(ConfigError::Invalid(format!(
                "Invalid channel {bad}. Must be 1-8"
            )));
        }

        if self.keithley.baud_rate == 0 || self.thermocouple.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".to_string()));
        }

        if self.keithley.accepted_models.is_empty() {
            return Err(ConfigError::Invalid(
                "keithley.accepted_models must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Session plan from the `[acquisition]` section.
    pub fn plan(&self) -> AcquisitionPlan {
        AcquisitionPlan::new(&self.acquisition.output)
            .with_channels(self.acquisition.channels.iter().copied())
            .with_thermocouple(self.acquisition.thermocouple)
            .with_unlock_on_stop(self.keithley.unlock_on_stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid_and_simulated() {
        let config = HallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.keithley.device, "Simulation");
        assert_eq!(config.thermocouple.baud_rate, 115_200);
        assert_eq!(config.thermocouple.timeout, Duration::from_millis(500));
    }

    #[test]
    fn toml_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hall.toml",
                r#"
                [keithley]
                device = "ASRL3::INSTR"
                timeout = "2s"

                [thermocouple]
                port = "/dev/ttyACM0"
                settle = "250ms"
                thermocouple_type = "K"
                mode = "oneshot"

                [acquisition]
                channels = [1, 2, 3]
                thermocouple = true
                "#,
            )?;

            let config = HallConfig::load_from("hall.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.keithley.device, "ASRL3::INSTR");
            assert_eq!(config.keithley.timeout, Duration::from_secs(2));
            assert_eq!(config.keithley.accepted_models, vec!["100", "199"]);
            assert_eq!(config.thermocouple.settle, Duration::from_millis(250));
            assert_eq!(config.thermocouple.thermocouple_type, ThermocoupleType::K);
            assert_eq!(config.thermocouple.mode, ThermocoupleMode::Oneshot);
            assert_eq!(config.acquisition.channels, vec![1, 2, 3]);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("hall.toml", "[application]\nlog_level = \"info\"\n")?;
            jail.set_env("HALL_DAQ_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("HALL_DAQ_KEITHLEY__DEVICE", "/dev/ttyUSB1");

            let config = HallConfig::load_from("hall.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.keithley.device, "/dev/ttyUSB1");
            Ok(())
        });
    }

    #[test]
    fn missing_file_uses_defaults() {
        Jail::expect_with(|_| {
            let config = HallConfig::load_from("nope.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, HallConfig::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = HallConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = HallConfig::default();
        config.acquisition.channels = vec![0];
        assert!(config.validate().is_err());

        let mut config = HallConfig::default();
        config.keithley.accepted_models.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn plan_follows_sections() {
        let mut config = HallConfig::default();
        config.acquisition.channels = vec![4, 2];
        config.acquisition.thermocouple = true;
        config.keithley.unlock_on_stop = false;

        let plan = config.plan();
        assert_eq!(plan.channels, vec![4, 2]);
        assert!(plan.thermocouple);
        assert!(!plan.unlock_on_stop);
    }
}
