//! Acquisition orchestration.
//!
//! One [`AcquisitionOrchestrator`] owns both drivers and runs at most one session at a time.
//! A session polls every enabled Keithley channel in ascending order, then the thermocouple,
//! and records each completed row to the output file and to any live [`RowSink`]s.
//!
//! ```text
//! Idle --start--> Armed --header written--> Running --stop / tick limit--> Idle
//! ```
//!
//! Device faults never end a session: they become NaN samples and log lines. Only a failure
//! to write the output file does.

pub mod clock;
pub mod output;
pub mod pump;
pub mod sink;

use crate::error::{AcquisitionError, DeviceFault};
use crate::keithley::{self, KeithleyDriver, StatusReport};
use crate::thermocouple::{TemperatureReading, ThermocoupleDriver};
use crate::transport::LinkState;
use clock::SessionClock;
use output::CsvOutput;
use pump::Pump;
use serde::Serialize;
use sink::{AcquisitionRow, RowSink, Sample, Source};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

/// What to record in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionPlan {
    /// Output file, truncated at session start.
    pub output: PathBuf,
    /// Keithley channels to poll.
    pub channels: Vec<u8>,
    /// Poll the thermocouple after the channels.
    pub thermocouple: bool,
    /// Return the Keithley front panel to local control when the session ends.
    pub unlock_on_stop: bool,
    /// End the session after this many rows.
    pub max_ticks: Option<u64>,
}

impl AcquisitionPlan {
    /// Plan with no sources; add some with the builder methods.
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            channels: Vec::new(),
            thermocouple: false,
            unlock_on_stop: true,
            max_ticks: None,
        }
    }

    /// Poll these Keithley channels.
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = u8>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    /// Poll the thermocouple.
    pub fn with_thermocouple(mut self, enabled: bool) -> Self {
        self.thermocouple = enabled;
        self
    }

    /// Unlock the Keithley front panel on stop.
    pub fn with_unlock_on_stop(mut self, unlock: bool) -> Self {
        self.unlock_on_stop = unlock;
        self
    }

    /// Stop after `ticks` rows.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Sources in column order: channels ascending and deduplicated, then the thermocouple.
    pub fn sources(&self) -> Result<Vec<Source>, AcquisitionError> {
        let mut channels = self.channels.clone();
        if let Some(&bad) = channels.iter().find(|ch| !keithley::CHANNELS.contains(ch)) {
            return Err(AcquisitionError::InvalidChannel(bad));
        }
        channels.sort_unstable();
        channels.dedup();

        let mut sources: Vec<Source> = channels.into_iter().map(Source::Channel).collect();
        if self.thermocouple {
            sources.push(Source::Thermocouple);
        }
        if sources.is_empty() {
            return Err(AcquisitionError::NoSources);
        }
        Ok(sources)
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AcquisitionState {
    /// No session.
    #[default]
    Idle,
    /// Session accepted, output being prepared.
    Armed,
    /// Loop ticking.
    Running,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// [`StopHandle::stop`] was called.
    UserCancel,
    /// The plan's tick limit was reached.
    TickLimit,
}

/// Result of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Output file.
    pub output: PathBuf,
    /// Data rows written (header lines excluded).
    pub rows_written: u64,
    /// Session origin, seconds since the Unix epoch.
    pub origin_epoch_seconds: f64,
    /// Why the session ended.
    pub stop_reason: StopReason,
}

/// Snapshot published for hosts while idle or running.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveStatus {
    /// Orchestrator state.
    pub state: AcquisitionState,
    /// Identified Keithley model, if any.
    pub keithley_model: Option<String>,
    /// Whether Keithley readings are simulated.
    pub keithley_simulated: bool,
    /// Last decoded machine status.
    pub machine_status: Option<StatusReport>,
    /// Most recent row.
    pub last_row: Option<AcquisitionRow>,
    /// Last non-numeric thermocouple reply.
    pub last_thermocouple_raw: Option<String>,
    /// Rows written in the current or last session.
    pub rows_written: u64,
}

/// Cloneable request to stop the running session at the next row boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop. The current row still completes.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs acquisition sessions over one Keithley and one thermocouple reader.
pub struct AcquisitionOrchestrator {
    keithley: Mutex<KeithleyDriver>,
    thermocouple: Mutex<ThermocoupleDriver>,
    state: parking_lot::Mutex<AcquisitionState>,
    stop: StopHandle,
    status: watch::Sender<LiveStatus>,
}

/// Returns the orchestrator to Idle when a session ends, however it ends.
struct SessionGuard<'a> {
    orchestrator: &'a AcquisitionOrchestrator,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.orchestrator.state.lock() = AcquisitionState::Idle;
        self.orchestrator.stop.clear();
        self.orchestrator
            .status
            .send_modify(|s| s.state = AcquisitionState::Idle);
    }
}

impl AcquisitionOrchestrator {
    /// Take ownership of both drivers.
    pub fn new(keithley: KeithleyDriver, thermocouple: ThermocoupleDriver) -> Self {
        let initial = LiveStatus {
            keithley_model: keithley.model().map(str::to_string),
            keithley_simulated: keithley.is_simulated(),
            ..LiveStatus::default()
        };
        let (status, _) = watch::channel(initial);
        Self {
            keithley: Mutex::new(keithley),
            thermocouple: Mutex::new(thermocouple),
            state: parking_lot::Mutex::new(AcquisitionState::Idle),
            stop: StopHandle::default(),
            status,
        }
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    /// Handle that stops the running session.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the running session at the next row boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Receiver for [`LiveStatus`] updates.
    pub fn subscribe(&self) -> watch::Receiver<LiveStatus> {
        self.status.subscribe()
    }

    /// Exclusive access to the Keithley. Waits while a session runs.
    pub async fn keithley(&self) -> MutexGuard<'_, KeithleyDriver> {
        self.keithley.lock().await
    }

    /// Exclusive access to the thermocouple reader. Waits while a session runs.
    pub async fn thermocouple(&self) -> MutexGuard<'_, ThermocoupleDriver> {
        self.thermocouple.lock().await
    }

    /// Give the drivers back.
    pub fn into_drivers(self) -> (KeithleyDriver, ThermocoupleDriver) {
        (self.keithley.into_inner(), self.thermocouple.into_inner())
    }

    /// Query and decode the Keithley machine status and publish it.
    pub async fn refresh_status(&self, pump: &mut dyn Pump) -> Result<StatusReport, DeviceFault> {
        let raw = self.keithley.lock().await.machine_status(pump).await?;
        let report = keithley::decode(&raw);
        tracing::debug!(raw = %raw, status = %report, "Machine status");
        self.status
            .send_modify(|s| s.machine_status = Some(report.clone()));
        Ok(report)
    }

    /// Run one session until it is stopped or reaches the plan's tick limit.
    ///
    /// Rejects the plan before any I/O when it has no sources, names a channel outside 1..=8,
    /// enables a disconnected thermocouple, or when another session is active. Device faults
    /// during the session are recorded as NaN; only output file failures end it early.
    pub async fn start(
        &self,
        plan: AcquisitionPlan,
        pump: &mut dyn Pump,
        sinks: &mut [&mut dyn RowSink],
    ) -> Result<SessionSummary, AcquisitionError> {
        let sources = plan.sources()?;

        {
            let mut state = self.state.lock();
            if *state != AcquisitionState::Idle {
                return Err(AcquisitionError::AlreadyRunning);
            }
            *state = AcquisitionState::Armed;
        }
        self.stop.clear();
        let _guard = SessionGuard { orchestrator: self };

        let mut keithley = self.keithley.lock().await;
        let mut thermocouple = self.thermocouple.lock().await;
        if plan.thermocouple && thermocouple.state() == LinkState::Disconnected {
            return Err(AcquisitionError::ThermocoupleUnavailable);
        }

        let clock = SessionClock::start();
        keithley.set_clock(clock.clone());

        let output_error = |source: std::io::Error| AcquisitionError::Output {
            path: plan.output.clone(),
            source,
        };
        let output = CsvOutput::create(&plan.output, &clock, &sources).map_err(output_error)?;

        for sink in sinks.iter_mut() {
            sink.on_session_start(&sources);
        }
        self.status.send_modify(|s| {
            s.state = AcquisitionState::Armed;
            s.keithley_model = keithley.model().map(str::to_string);
            s.keithley_simulated = keithley.is_simulated();
            s.last_row = None;
            s.last_thermocouple_raw = None;
            s.rows_written = 0;
        });

        *self.state.lock() = AcquisitionState::Running;
        self.status
            .send_modify(|s| s.state = AcquisitionState::Running);
        tracing::info!(
            output = %plan.output.display(),
            sources = sources.len(),
            simulated = keithley.is_simulated(),
            "Acquisition started"
        );

        let mut rows_written = 0u64;
        let outcome = loop {
            if self.stop.is_stop_requested() {
                break Ok(StopReason::UserCancel);
            }
            if plan.max_ticks.is_some_and(|max| rows_written >= max) {
                break Ok(StopReason::TickLimit);
            }

            let row = self
                .acquire_row(rows_written, &sources, &mut keithley, &mut thermocouple, &clock, pump)
                .await;

            if let Err(e) = output.append(&row) {
                tracing::error!(error = %e, path = %plan.output.display(), "Could not write row");
                break Err(output_error(e));
            }
            for sink in sinks.iter_mut() {
                sink.on_row(&row);
            }
            rows_written += 1;
            self.status.send_modify(|s| {
                s.rows_written = rows_written;
                s.last_row = Some(row);
            });
        };

        if plan.unlock_on_stop {
            if let Err(fault) = keithley.unlock().await {
                tracing::warn!(error = %fault, "Could not unlock front panel");
            }
        }

        let stop_reason = outcome?;
        tracing::info!(rows = rows_written, reason = ?stop_reason, "Acquisition stopped");
        Ok(SessionSummary {
            output: plan.output,
            rows_written,
            origin_epoch_seconds: clock.origin_epoch_seconds(),
            stop_reason,
        })
    }

    /// Poll every source once, in column order.
    async fn acquire_row(
        &self,
        index: u64,
        sources: &[Source],
        keithley: &mut KeithleyDriver,
        thermocouple: &mut ThermocoupleDriver,
        clock: &SessionClock,
        pump: &mut dyn Pump,
    ) -> AcquisitionRow {
        let mut samples = Vec::with_capacity(sources.len());

        for &source in sources {
            let (timestamp, value) = match source {
                Source::Channel(channel) => keithley.get_voltage(channel, pump).await,
                Source::Thermocouple => {
                    let reading = thermocouple.get_temperature().await;
                    let timestamp = clock.elapsed();
                    (timestamp, self.temperature_value(reading))
                }
            };
            // Once per sample, whatever the link state.
            pump.pump().await;
            samples.push(Sample {
                source,
                timestamp,
                value,
            });
        }

        AcquisitionRow { index, samples }
    }

    fn temperature_value(&self, reading: Result<TemperatureReading, DeviceFault>) -> f64 {
        match reading {
            Ok(TemperatureReading::Celsius(value)) => value,
            Ok(TemperatureReading::Raw(raw)) => {
                tracing::error!(raw = %raw, "Bad format {raw:?}");
                self.status
                    .send_modify(|s| s.last_thermocouple_raw = Some(raw));
                f64::NAN
            }
            Err(fault) => {
                tracing::error!(error = %fault, "Thermocouple reading failed");
                f64::NAN
            }
        }
    }
}

impl std::fmt::Debug for AcquisitionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionOrchestrator")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::pump::{FnPump, NoopPump};
    use super::sink::RowBuffer;
    use super::*;
    use crate::keithley::KeithleySettings;
    use crate::thermocouple::ThermocoupleSettings;
    use crate::transport::mock::{MockProbe, MockReply, ScriptedTransport};
    use crate::transport::DeviceHandle;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn simulated_bench() -> AcquisitionOrchestrator {
        AcquisitionOrchestrator::new(
            KeithleyDriver::simulated(KeithleySettings::default()),
            ThermocoupleDriver::simulated(ThermocoupleSettings::default()),
        )
    }

    /// Connected Keithley that identifies as a 199 and reads 1 mV everywhere.
    async fn emulated_keithley() -> (KeithleyDriver, MockProbe) {
        let (transport, probe) = ScriptedTransport::with_responder(|writes| {
            if writes.iter().any(|w| w == "U0X") {
                MockReply::Line("1990B000000000000000021".into())
            } else {
                MockReply::Line("NDCV+1.0E-3".into())
            }
        });
        let keithley = KeithleyDriver::attach(
            DeviceHandle::Connected(Box::new(transport)),
            KeithleySettings::default(),
        )
        .await;
        probe.clear_writes();
        (keithley, probe)
    }

    fn lines(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn plan_orders_and_validates_sources() {
        let plan = AcquisitionPlan::new("x.csv")
            .with_channels([3, 1, 3])
            .with_thermocouple(true);
        assert_eq!(
            plan.sources().unwrap(),
            vec![Source::Channel(1), Source::Channel(3), Source::Thermocouple]
        );

        assert!(matches!(
            AcquisitionPlan::new("x.csv").sources(),
            Err(AcquisitionError::NoSources)
        ));
        assert!(matches!(
            AcquisitionPlan::new("x.csv").with_channels([2, 9]).sources(),
            Err(AcquisitionError::InvalidChannel(9))
        ));
    }

    #[tokio::test]
    async fn rejected_plans_touch_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.csv");
        let orchestrator = simulated_bench();

        let result = orchestrator
            .start(AcquisitionPlan::new(&path), &mut NoopPump, &mut [])
            .await;
        assert!(matches!(result, Err(AcquisitionError::NoSources)));
        assert!(!path.exists());
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_thermocouple_is_rejected() {
        let (transport, probe) = ScriptedTransport::new();
        probe.push_reply(MockReply::Line("not a thermocouple".into()));
        let thermocouple = ThermocoupleDriver::attach(
            DeviceHandle::Connected(Box::new(transport)),
            ThermocoupleSettings::default(),
        )
        .await;
        let orchestrator = AcquisitionOrchestrator::new(
            KeithleyDriver::simulated(KeithleySettings::default()),
            thermocouple,
        );

        let dir = tempfile::tempdir().unwrap();
        let plan = AcquisitionPlan::new(dir.path().join("t.csv"))
            .with_channels([1])
            .with_thermocouple(true);
        let result = orchestrator.start(plan, &mut NoopPump, &mut []).await;

        assert!(matches!(result, Err(AcquisitionError::ThermocoupleUnavailable)));
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_limit_writes_exact_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let orchestrator = simulated_bench();
        let mut buffer = RowBuffer::new();

        let plan = AcquisitionPlan::new(&path)
            .with_channels([2, 1])
            .with_thermocouple(true)
            .with_max_ticks(3);
        let summary = orchestrator
            .start(plan, &mut NoopPump, &mut [&mut buffer])
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.stop_reason, StopReason::TickLimit);
        assert_eq!(buffer.len(), 3);

        let lines = lines(&path);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], "t1,v1,t2,v2,t9,T");
        for line in &lines[3..] {
            assert_eq!(line.split(',').count(), 6);
        }

        let times: Vec<f64> = ["t1", "t2", "t9"]
            .iter()
            .flat_map(|label| buffer.column(label).unwrap().to_vec())
            .collect();
        assert!(times.iter().all(|t| *t >= 0.0));
        let t1 = buffer.column("t1").unwrap();
        assert!(t1.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_row_finishes_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let (keithley, _probe) = emulated_keithley().await;
        let orchestrator = AcquisitionOrchestrator::new(
            keithley,
            ThermocoupleDriver::simulated(ThermocoupleSettings::default()),
        );
        let stop = orchestrator.stop_handle();

        // Three pumps inside the driver plus one per sample; stop at the end of channel 1.
        let mut calls = 0;
        let mut pump = FnPump(|| {
            calls += 1;
            if calls == 4 {
                stop.stop();
            }
        });
        let plan = AcquisitionPlan::new(&path)
            .with_channels([1, 2])
            .with_thermocouple(true);
        let summary = orchestrator.start(plan, &mut pump, &mut []).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::UserCancel);
        assert_eq!(summary.rows_written, 1);
        let lines = lines(&path);
        assert_eq!(lines.len(), 3 + 1);
        assert_eq!(lines[3].split(',').count(), 6);
        assert!(!orchestrator.stop_handle().is_stop_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_channels_pump_once_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pumped.csv");
        let orchestrator = simulated_bench();
        let stop = orchestrator.stop_handle();

        let mut calls = 0;
        let mut pump = FnPump(|| {
            calls += 1;
            stop.stop();
        });
        let plan = AcquisitionPlan::new(&path)
            .with_channels([1, 2])
            .with_max_ticks(5);
        let summary = orchestrator.start(plan, &mut pump, &mut []).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::UserCancel);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(calls, 2);
        assert_eq!(lines(&path).len(), 3 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = simulated_bench();

        let mut pump = NoopPump;
        let mut no_sinks: [&mut dyn RowSink; 0] = [];
        let first = orchestrator.start(
            AcquisitionPlan::new(dir.path().join("a.csv"))
                .with_channels([1])
                .with_max_ticks(2),
            &mut pump,
            &mut no_sinks,
        );
        let second = async {
            // Let the first session arm before trying again.
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(orchestrator.state(), AcquisitionState::Running);
            orchestrator
                .start(
                    AcquisitionPlan::new(dir.path().join("b.csv")).with_channels([1]),
                    &mut NoopPump,
                    &mut [],
                )
                .await
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().rows_written, 2);
        assert!(matches!(second, Err(AcquisitionError::AlreadyRunning)));
        assert!(!dir.path().join("b.csv").exists());
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn live_status_tracks_session() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = simulated_bench();
        let rx = orchestrator.subscribe();

        let report = orchestrator.refresh_status(&mut NoopPump).await.unwrap();
        assert_eq!(rx.borrow().machine_status.as_ref(), Some(&report));
        assert!(rx.borrow().keithley_simulated);

        orchestrator
            .start(
                AcquisitionPlan::new(dir.path().join("s.csv"))
                    .with_channels([4])
                    .with_max_ticks(2),
                &mut NoopPump,
                &mut [],
            )
            .await
            .unwrap();

        let status = rx.borrow();
        assert_eq!(status.state, AcquisitionState::Idle);
        assert_eq!(status.rows_written, 2);
        let last = status.last_row.as_ref().unwrap();
        assert_eq!(last.index, 1);
        assert_eq!(last.samples[0].source, Source::Channel(4));
    }

    #[tokio::test]
    #[traced_test]
    async fn raw_thermocouple_reply_becomes_nan() {
        let (transport, probe) = ScriptedTransport::new();
        probe.push_reply(MockReply::Line("Thermocouple v2".into()));
        probe.push_reply(MockReply::Line("OPEN".into()));
        let settings = ThermocoupleSettings {
            settle: Duration::ZERO,
            ..ThermocoupleSettings::default()
        };
        let thermocouple =
            ThermocoupleDriver::attach(DeviceHandle::Connected(Box::new(transport)), settings).await;
        let orchestrator = AcquisitionOrchestrator::new(
            KeithleyDriver::simulated(KeithleySettings::default()),
            thermocouple,
        );
        let rx = orchestrator.subscribe();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let plan = AcquisitionPlan::new(&path)
            .with_thermocouple(true)
            .with_max_ticks(1);
        orchestrator.start(plan, &mut NoopPump, &mut []).await.unwrap();

        let lines = lines(&path);
        assert!(lines[3].ends_with(",nan"), "{}", lines[3]);
        assert_eq!(rx.borrow().last_thermocouple_raw.as_deref(), Some("OPEN"));
        assert!(logs_contain("Bad format"));
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_on_stop_is_sent() {
        let (keithley, probe) = emulated_keithley().await;
        let orchestrator = AcquisitionOrchestrator::new(
            keithley,
            ThermocoupleDriver::simulated(ThermocoupleSettings::default()),
        );

        let dir = tempfile::tempdir().unwrap();
        let plan = AcquisitionPlan::new(dir.path().join("u.csv"))
            .with_channels([5])
            .with_max_ticks(1);
        orchestrator.start(plan, &mut NoopPump, &mut []).await.unwrap();
        assert_eq!(probe.writes(), vec!["F0R0N5X", "++read 10", "++loc"]);

        probe.clear_writes();
        let plan = AcquisitionPlan::new(dir.path().join("v.csv"))
            .with_channels([5])
            .with_max_ticks(1)
            .with_unlock_on_stop(false);
        orchestrator.start(plan, &mut NoopPump, &mut []).await.unwrap();
        assert_eq!(probe.writes(), vec!["F0R0N5X", "++read 10"]);
    }

    #[tokio::test(start_paused = true)]
    async fn output_failure_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("run.csv");
        let orchestrator = simulated_bench();

        let result = orchestrator
            .start(
                AcquisitionPlan::new(&path).with_channels([1]),
                &mut NoopPump,
                &mut [],
            )
            .await;
        assert!(matches!(result, Err(AcquisitionError::Output { .. })));
        assert_eq!(orchestrator.state(), AcquisitionState::Idle);
    }
}
