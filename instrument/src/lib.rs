//! Collects `tracing` events from simulation runs into columnar tables.
//!
//! The simulation emits one flat numeric event per record, keyed by target:
//! `tracing::info!(target: "period", period = 3u64, mean_price = 4.2, ...)`.
//! A thread-local recorder groups events by target into one table per target,
//! one row per event, one column per field. Tables convert to polars
//! DataFrames for analysis and can be dumped to parquet.
//!
//! ```ignore
//! let mut rec = instrument::ScopedRecorder::new("data", "baseline");
//! // ... run simulation ...
//! let periods = &rec.get()["period"];
//! // rec drops -> writes data/<stamp>_baseline/*.parquet + _ready
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

// ============================================================================
// Columnar storage
// ============================================================================

/// One column of a recorded table. Simulation events carry only numeric
/// fields, so three value types cover every recorded column.
#[derive(Debug, Clone)]
pub enum NumericColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl NumericColumn {
    pub fn len(&self) -> usize {
        match self {
            NumericColumn::U64(v) => v.len(),
            NumericColumn::I64(v) => v.len(),
            NumericColumn::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn u64s(&self) -> Option<&[u64]> {
        match self {
            NumericColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn f64s(&self) -> Option<&[f64]> {
        match self {
            NumericColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Extend with zeros up to `rows` elements.
    fn pad_to(&mut self, rows: usize) {
        match self {
            NumericColumn::U64(v) => v.resize(rows, 0),
            NumericColumn::I64(v) => v.resize(rows, 0),
            NumericColumn::F64(v) => v.resize(rows, 0.0),
        }
    }
}

/// A table of recorded events sharing one tracing target.
///
/// Columns are keyed by field name; the schema grows as events introduce new
/// fields. Every column always holds exactly `rows` values, zero-padded where
/// an event did not carry the field.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    pub columns: BTreeMap<String, NumericColumn>,
    pub rows: usize,
}

impl EventTable {
    fn record_event(&mut self, event: &Event<'_>) {
        // Invariant on entry: every column has exactly `rows` values, so the
        // visitor can push one value per recorded field.
        event.record(&mut FieldVisitor {
            columns: &mut self.columns,
            rows: self.rows,
        });
        self.rows += 1;
        for col in self.columns.values_mut() {
            col.pad_to(self.rows);
        }
    }

    /// Convert to a polars DataFrame, columns in field-name order.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|(name, col)| match col {
                NumericColumn::U64(v) => Column::new(name.into(), v),
                NumericColumn::I64(v) => Column::new(name.into(), v),
                NumericColumn::F64(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// All tables recorded on the current thread, keyed by tracing target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: BTreeMap<String, EventTable>,
}

impl Recorder {
    pub fn to_dataframes(&self) -> BTreeMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| table.to_dataframe().ok().map(|df| (name.clone(), df)))
            .collect()
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

// ============================================================================
// Tracing plumbing
// ============================================================================

struct FieldVisitor<'a> {
    columns: &'a mut BTreeMap<String, NumericColumn>,
    /// Rows already in the table; new columns are zero-padded to this depth.
    rows: usize,
}

// A field that changes type between events keeps its first type; mismatched
// values are dropped and padded over.
impl Visit for FieldVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        let rows = self.rows;
        let col = self
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| NumericColumn::U64(vec![0; rows]));
        if let NumericColumn::U64(v) = col {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        let rows = self.rows;
        let col = self
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| NumericColumn::I64(vec![0; rows]));
        if let NumericColumn::I64(v) = col {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let rows = self.rows;
        let col = self
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| NumericColumn::F64(vec![0.0; rows]));
        if let NumericColumn::F64(v) = col {
            v.push(value);
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {
        // Non-numeric fields are dropped.
    }
}

/// Subscriber that routes info-level events into the thread-local recorder.
pub struct TableSubscriber;

impl Subscriber for TableSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            r.borrow_mut()
                .tables
                .entry(target)
                .or_default()
                .record_event(event)
        });
    }

    // Spans are not tracked.
    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install [`TableSubscriber`] as the global default. Safe to call more than
/// once; later calls are no-ops.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(TableSubscriber);
}

/// Take everything recorded on this thread, leaving the recorder empty.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Discard everything recorded on this thread.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

/// Drain and convert every table to a polars DataFrame.
pub fn drain_to_dataframes() -> BTreeMap<String, DataFrame> {
    drain().to_dataframes()
}

// ============================================================================
// Parquet runs
// ============================================================================

/// Write each DataFrame as `{dir}/{name}.parquet`.
pub fn save_parquet(dfs: &mut BTreeMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    let io_err = |e: std::io::Error| PolarsError::IO {
        error: e.into(),
        msg: None,
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_err)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

/// Days-since-epoch plus wall clock, e.g. `d20643_1412`. Sorts
/// chronologically as a plain string.
fn run_stamp(t: SystemTime) -> String {
    let secs = t
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let rem = secs % 86_400;
    format!("d{:05}_{:02}{:02}", secs / 86_400, rem / 3600, (rem % 3600) / 60)
}

fn sanitize(name: &str) -> String {
    let mut s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    s.truncate(48);
    s
}

/// RAII recorder for one simulation run.
///
/// Creation clears the thread-local recorder and installs the subscriber.
/// Call [`get`](Self::get) after the run to drain and inspect the DataFrames.
/// On drop the DataFrames land as parquet under a per-run directory, followed
/// by a `_ready` sentinel so watchers know the dump is complete.
pub struct ScopedRecorder {
    run_dir: PathBuf,
    run_name: String,
    dfs: Option<BTreeMap<String, DataFrame>>,
}

impl ScopedRecorder {
    /// Record into `{parent}/{stamp}_{name}/`.
    pub fn new(parent: impl Into<PathBuf>, name: &str) -> Self {
        let run_name = format!("{}_{}", run_stamp(SystemTime::now()), sanitize(name));
        let run_dir = parent.into().join(&run_name);
        clear();
        install_subscriber();
        Self {
            run_dir,
            run_name,
            dfs: None,
        }
    }

    /// Drain on first call, then return the cached DataFrames.
    pub fn get(&mut self) -> &BTreeMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for ScopedRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        if let Err(e) = save_parquet(&mut dfs, &self.run_dir) {
            eprintln!("ScopedRecorder({}): parquet write failed: {e}", self.run_name);
            return;
        }
        if let Err(e) = std::fs::File::create(self.run_dir.join("_ready")) {
            eprintln!("ScopedRecorder({}): sentinel write failed: {e}", self.run_name);
        }
    }
}
