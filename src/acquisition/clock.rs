//! Session clock.

use chrono::{DateTime, Local};
use tokio::time::Instant;

/// Single time origin for one acquisition session.
///
/// Sample times are seconds since the origin, measured on the monotonic clock, so they never
/// go backwards even if the wall clock is adjusted mid-session. The wall-clock origin is kept
/// only for the output file header.
#[derive(Debug, Clone)]
pub struct SessionClock {
    origin: Instant,
    wall_origin: DateTime<Local>,
}

impl SessionClock {
    /// Capture a new origin now.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Local::now(),
        }
    }

    /// Seconds elapsed since the origin.
    pub fn elapsed(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Wall-clock time of the origin.
    pub fn wall_origin(&self) -> DateTime<Local> {
        self.wall_origin
    }

    /// Origin as seconds since the Unix epoch, with sub-second precision.
    pub fn origin_epoch_seconds(&self) -> f64 {
        self.wall_origin.timestamp_micros() as f64 / 1e6
    }

    /// Origin formatted like C `ctime`, e.g. `Tue Mar  4 14:05:09 2025`.
    pub fn origin_ctime(&self) -> String {
        self.wall_origin.format("%a %b %e %H:%M:%S %Y").to_string()
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}
