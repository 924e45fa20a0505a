//! Session output file.
//!
//! Layout:
//!
//! ```text
//! Date:,Tue Mar  4 14:05:09 2025
//! Time:,1741093509.123456
//! t1,v1,t2,v2,t9,T
//! 0.401,0.0123,0.802,0.0456,0.81,22.5
//! ```
//!
//! The file is created once with the header, then reopened in append mode for every row and
//! closed again. No handle is held between rows, so another program can read the file while
//! the session runs.

use super::clock::SessionClock;
use super::sink::{column_labels, format_number, AcquisitionRow, Source};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Comma-separated output file of one session.
#[derive(Debug, Clone)]
pub struct CsvOutput {
    path: PathBuf,
}

fn writer<W: io::Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(inner)
}

impl CsvOutput {
    /// Create (or truncate) `path` and write the three header lines.
    pub fn create(path: &Path, clock: &SessionClock, sources: &[Source]) -> io::Result<Self> {
        let mut out = writer(File::create(path)?);
        out.write_record(["Date:", clock.origin_ctime().as_str()])?;
        out.write_record(["Time:", format_number(clock.origin_epoch_seconds()).as_str()])?;
        out.write_record(column_labels(sources))?;
        out.flush()?;

        tracing::debug!(path = %path.display(), "Output header written");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append one row and close the file.
    pub fn append(&self, row: &AcquisitionRow) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut out = writer(file);
        out.write_record(row.fields())?;
        out.flush()
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
