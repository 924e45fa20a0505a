//! Connecting the whole bench from configuration.

use crate::acquisition::AcquisitionOrchestrator;
use crate::config::HallConfig;
use crate::keithley::KeithleyDriver;
use crate::thermocouple::ThermocoupleDriver;
use crate::transport::{DeviceResolver, LinkState, PortResolver};

/// Both instruments, connected and ready for acquisition.
#[derive(Debug)]
pub struct Bench {
    orchestrator: AcquisitionOrchestrator,
}

impl Bench {
    /// Connect with the default [`PortResolver`].
    pub async fn connect(config: &HallConfig) -> Self {
        Self::connect_with(config, &PortResolver).await
    }

    /// Connect both instruments, resolving identifiers with `resolver`.
    ///
    /// Never fails: unreachable instruments are simulated, and a thermocouple reader that
    /// fails its handshake is left disconnected. A connected reader gets the configured
    /// junction type and conversion mode.
    pub async fn connect_with(config: &HallConfig, resolver: &dyn DeviceResolver) -> Self {
        let keithley_target = resolver.resolve(&config.keithley.device);
        let keithley = KeithleyDriver::connect(&keithley_target, config.keithley.settings()).await;

        let thermocouple_target = resolver.resolve(&config.thermocouple.port);
        let mut thermocouple =
            ThermocoupleDriver::connect(&thermocouple_target, config.thermocouple.settings()).await;

        if thermocouple.state() != LinkState::Disconnected {
            let kind = config.thermocouple.thermocouple_type;
            let mode = config.thermocouple.mode;
            if let Err(fault) = thermocouple.set_thermocouple_type(kind).await {
                tracing::warn!(error = %fault, kind = %kind, "Could not set thermocouple type");
            }
            if let Err(fault) = thermocouple.set_mode(mode).await {
                tracing::warn!(error = %fault, mode = %mode, "Could not set thermocouple mode");
            }
        }

        tracing::info!(
            keithley = ?keithley.state(),
            model = keithley.model().unwrap_or("simulated"),
            thermocouple = ?thermocouple.state(),
            "Bench connected"
        );

        Self {
            orchestrator: AcquisitionOrchestrator::new(keithley, thermocouple),
        }
    }

    /// The orchestrator that owns both drivers.
    pub fn orchestrator(&self) -> &AcquisitionOrchestrator {
        &self.orchestrator
    }

    /// Release both links.
    pub async fn disconnect(self) {
        let (mut keithley, mut thermocouple) = self.orchestrator.into_drivers();
        keithley.close().await;
        thermocouple.disconnect().await;
        tracing::info!("Bench disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeviceTarget;

    struct AlwaysSimulate;

    impl DeviceResolver for AlwaysSimulate {
        fn resolve(&self, _id: &str) -> DeviceTarget {
            DeviceTarget::Simulation
        }
    }

    #[tokio::test]
    async fn default_config_is_fully_simulated() {
        let bench = Bench::connect(&HallConfig::default()).await;
        let orchestrator = bench.orchestrator();

        assert!(orchestrator.keithley().await.is_simulated());
        assert!(orchestrator.thermocouple().await.is_simulated());
        assert!(orchestrator.subscribe().borrow().keithley_simulated);

        bench.disconnect().await;
    }

    #[tokio::test]
    async fn resolver_decides_targets() {
        let mut config = HallConfig::default();
        config.keithley.device = "ASRL3::INSTR".to_string();
        config.thermocouple.port = "COM5: USB Serial".to_string();

        let bench = Bench::connect_with(&config, &AlwaysSimulate).await;
        assert_eq!(
            bench.orchestrator().keithley().await.state(),
            LinkState::Simulated
        );
    }
}
