//! Rows, samples and the consumers that receive them.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    /// Keithley scanner channel (1..=8).
    Channel(u8),
    /// Thermocouple reader.
    Thermocouple,
}

impl Source {
    /// Label of this source's time column.
    pub fn time_label(&self) -> String {
        match self {
            Source::Channel(n) => format!("t{n}"),
            Source::Thermocouple => "t9".to_string(),
        }
    }

    /// Label of this source's value column.
    pub fn value_label(&self) -> String {
        match self {
            Source::Channel(n) => format!("v{n}"),
            Source::Thermocouple => "T".to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Channel(n) => write!(f, "channel {n}"),
            Source::Thermocouple => f.write_str("thermocouple"),
        }
    }
}

/// Column labels for `sources`, two per source.
pub fn column_labels(sources: &[Source]) -> Vec<String> {
    sources
        .iter()
        .flat_map(|s| [s.time_label(), s.value_label()])
        .collect()
}

/// One timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Origin of the reading.
    pub source: Source,
    /// Seconds since the session origin.
    pub timestamp: f64,
    /// Reading, NaN on fault.
    pub value: f64,
}

/// One tick's worth of samples, in session column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionRow {
    /// Zero-based tick index.
    pub index: u64,
    /// Samples in column order.
    pub samples: Vec<Sample>,
}

impl AcquisitionRow {
    /// Text fields for the output file, `t, v` per sample.
    pub fn fields(&self) -> Vec<String> {
        self.samples
            .iter()
            .flat_map(|s| [format_number(s.timestamp), format_number(s.value)])
            .collect()
    }
}

/// Format a number for the output file. Non-finite values use lowercase names.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        value.to_string()
    }
}

/// Live consumer of acquisition rows (plots, buffers, network forwarders).
///
/// Sinks run on the acquisition context between ticks and must not block.
pub trait RowSink: Send {
    /// A session started with these sources, in column order.
    fn on_session_start(&mut self, _sources: &[Source]) {}

    /// A complete row was recorded.
    fn on_row(&mut self, row: &AcquisitionRow);
}

/// In-memory, column-major copy of the session.
#[derive(Debug, Default, Clone)]
pub struct RowBuffer {
    labels: Vec<String>,
    columns: Vec<Vec<f64>>,
    rows: usize,
}

impl RowBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Column labels of the current session.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Values of the column named `label`.
    pub fn column(&self, label: &str) -> Option<&[f64]> {
        let index = self.labels.iter().position(|l| l == label)?;
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Whether no rows are held.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

impl RowSink for RowBuffer {
    fn on_session_start(&mut self, sources: &[Source]) {
        self.labels = column_labels(sources);
        self.columns = vec![Vec::new(); self.labels.len()];
        self.rows = 0;
    }

    fn on_row(&mut self, row: &AcquisitionRow) {
        let values = row.samples.iter().flat_map(|s| [s.timestamp, s.value]);
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        self.rows += 1;
    }
}

/// Forwards rows to another task.
///
/// Rows are dropped (and logged) when the receiver falls behind; the acquisition loop never
/// waits on a consumer.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<AcquisitionRow>,
    dropped: u64,
}

impl ChannelSink {
    /// Create a sink and the receiver for its rows.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AcquisitionRow>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, dropped: 0 }, rx)
    }

    /// Rows dropped because the receiver was full or gone.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl RowSink for ChannelSink {
    fn on_row(&mut self, row: &AcquisitionRow) {
        match self.tx.try_send(row.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::warn!(row = row.index, dropped = self.dropped, "Row receiver lagging, row dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped += 1;
                if self.dropped == 1 {
                    tracing::debug!("Row receiver closed");
                }
            }
        }
    }
}
