use hall_daq::telemetry::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_ansi(false);

    assert!(telemetry::init(config.clone()).is_ok());
    assert!(telemetry::init(config).is_ok());
    tracing::debug!("subscriber installed");
}
