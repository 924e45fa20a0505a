//! Mapping from user-facing device identifiers to connection targets.
//!
//! Hosts hand the core whatever string their device picker produced: a VISA-style
//! `ASRL3::INSTR`, a port listing entry such as `COM5: USB Serial Device (COM5)`, a plain
//! `/dev/ttyUSB0`, or the word `Simulation`. Enumerating the ports is the host's job; this
//! module only resolves one chosen identifier.

/// Where a driver should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    /// Do not open anything; simulate the instrument.
    Simulation,
    /// Open this serial port path.
    Serial(String),
}

/// Resolves device identifiers to connection targets.
pub trait DeviceResolver: Send + Sync {
    /// Resolve `id`. Never fails; unknown identifiers are treated as port paths.
    fn resolve(&self, id: &str) -> DeviceTarget;
}

/// Default resolver for serial-attached instruments.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortResolver;

impl DeviceResolver for PortResolver {
    fn resolve(&self, id: &str) -> DeviceTarget {
        let id = id.trim();
        if id.is_empty() || id.eq_ignore_ascii_case("simulation") {
            return DeviceTarget::Simulation;
        }

        if let Some(port) = asrl_port(id) {
            return DeviceTarget::Serial(port);
        }

        // Port listings come as "<port>: <description>".
        let port = match id.split_once(": ") {
            Some((port, _description)) => port.trim(),
            None => id,
        };
        DeviceTarget::Serial(port.to_string())
    }
}

/// `ASRL<n>::INSTR` names serial port `n` (1-based).
fn asrl_port(id: &str) -> Option<String> {
    let upper = id.to_ascii_uppercase();
    let rest = upper.strip_prefix("ASRL")?;
    let number = rest.strip_suffix("::INSTR").unwrap_or(rest);
    let n: u32 = number.parse().ok()?;
    if n == 0 {
        return None;
    }

    if cfg!(windows) {
        Some(format!("COM{n}"))
    } else {
        Some(format!("/dev/ttyS{}", n - 1))
    }
}
