//! CSV sink for per-invocation benchmark rows.

use std::fs::{File, OpenOptions};
use std::path::Path;

use csv::Writer;
use parking_lot::Mutex;
use tracing::warn;

/// Appends one row per completed invocation:
/// `function_name, input_name, input_size, execution_seconds`.
pub struct CsvSink {
  writer: Mutex<Writer<File>>,
}

impl CsvSink {
  /// Opens `path` for appending, creating it on first use.
  pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self {
      writer: Mutex::new(Writer::from_writer(file)),
    })
  }

  /// Records a completed invocation. Write failures are logged, never
  /// propagated; the sink must not fail an invocation.
  pub fn record(
    &self,
    function_name: &str,
    input_name: &str,
    input_size: usize,
    execution_seconds: f64,
  ) {
    let size = input_size.to_string();
    let seconds = format!("{execution_seconds:.6}");
    let mut writer = self.writer.lock();
    if let Err(err) = writer.write_record([function_name, input_name, size.as_str(), seconds.as_str()]) {
      warn!(error = %err, "failed to write csv row");
      return;
    }
    if let Err(err) = writer.flush() {
      warn!(error = %err, "failed to flush csv sink");
    }
  }
}
