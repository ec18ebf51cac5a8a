//! Metric registry: named, typed, labeled series rendered to the Prometheus
//! exposition format.
//!
//! The registry is a plain mapping with one writer (the updater) and any
//! number of readers. Values are last-write-wins; label combinations
//! accumulate for the process lifetime so a disk or interface seen once keeps
//! reporting its last known value even if absent from later samples.

use std::collections::HashMap;
use std::fmt::Write as _;
use thiserror::Error;

/// Metric type as declared at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Value can move in either direction; overwritten on every update.
    Gauge,
    /// Cumulative total, fed either by deltas or an absolute external reading.
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Errors are programming mistakes (bad registration or malformed writes),
/// not runtime conditions; they never corrupt other series.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("metric '{name}' is already registered with a different kind or label schema")]
    SchemaConflict { name: String },

    #[error("metric '{name}' expects {expected} label value(s), got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("metric '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("series handle {index} does not belong to this registry")]
    UnknownHandle { index: usize },
}

/// Opaque handle to a registered series, returned by [`Registry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesHandle(usize);

/// One named series: identity plus the current value per label combination.
struct MetricSeries {
    name: String,
    kind: MetricKind,
    help: String,
    label_names: Vec<String>,
    /// Label-value combinations in first-seen order, each with its current value.
    values: Vec<(Vec<String>, f64)>,
}

impl MetricSeries {
    /// Find or create the slot for a label combination (created at 0).
    fn slot(&mut self, label_values: &[&str]) -> &mut f64 {
        let idx = match self
            .values
            .iter()
            .position(|(labels, _)| labels.iter().map(String::as_str).eq(label_values.iter().copied()))
        {
            Some(idx) => idx,
            None => {
                self.values
                    .push((label_values.iter().map(|v| v.to_string()).collect(), 0.0));
                self.values.len() - 1
            }
        };
        &mut self.values[idx].1
    }
}

/// Insertion-ordered collection of metric series.
///
/// Created once at startup and shared for the process lifetime; rendering
/// never fails and never mutates state.
#[derive(Default)]
pub struct Registry {
    series: Vec<MetricSeries>,
    by_name: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a series, or return the existing handle when the name is
    /// already registered with an identical kind and label schema.
    pub fn register(
        &mut self,
        name: &str,
        kind: MetricKind,
        help: &str,
        label_names: &[&str],
    ) -> Result<SeriesHandle, RegistryError> {
        if let Some(&idx) = self.by_name.get(name) {
            let existing = &self.series[idx];
            let same_schema = existing.kind == kind
                && existing.label_names.iter().map(String::as_str).eq(label_names.iter().copied());
            if same_schema {
                return Ok(SeriesHandle(idx));
            }
            return Err(RegistryError::SchemaConflict {
                name: name.to_string(),
            });
        }

        let idx = self.series.len();
        self.series.push(MetricSeries {
            name: name.to_string(),
            kind,
            help: help.to_string(),
            label_names: label_names.iter().map(|n| n.to_string()).collect(),
            values: Vec::new(),
        });
        self.by_name.insert(name.to_string(), idx);
        Ok(SeriesHandle(idx))
    }

    /// Overwrite a gauge value for one label combination.
    pub fn set_gauge(
        &mut self,
        handle: SeriesHandle,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), RegistryError> {
        let series = self.checked_series(handle, MetricKind::Gauge, label_values)?;
        *series.slot(label_values) = value;
        Ok(())
    }

    /// Add a delta to a counter.
    pub fn increment_counter(
        &mut self,
        handle: SeriesHandle,
        label_values: &[&str],
        delta: f64,
    ) -> Result<(), RegistryError> {
        let series = self.checked_series(handle, MetricKind::Counter, label_values)?;
        *series.slot(label_values) += delta;
        Ok(())
    }

    /// Set a counter directly from an absolute external reading.
    ///
    /// The updater has no persisted delta state, so cumulative OS counters
    /// (e.g. interface byte totals) are written with replace semantics. A
    /// reading lower than the stored value is passed through unchanged; the
    /// rewind is logged so interface resets stay observable.
    pub fn set_counter_absolute(
        &mut self,
        handle: SeriesHandle,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), RegistryError> {
        let series = self.checked_series(handle, MetricKind::Counter, label_values)?;
        let slot = series.slot(label_values);
        let previous = *slot;
        *slot = value;
        if value < previous {
            tracing::debug!(
                metric = %self.series[handle.0].name,
                previous,
                new = value,
                "counter value went backwards"
            );
        }
        Ok(())
    }

    /// Render every series in registration order to the Prometheus text format.
    ///
    /// One `# HELP` and one `# TYPE` line per series, then one line per
    /// stored label combination with labels in declared-name order. An empty
    /// label set renders without braces.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for series in &self.series {
            // A write! into a String cannot fail.
            let _ = writeln!(out, "# HELP {} {}", series.name, escape_help(&series.help));
            let _ = writeln!(out, "# TYPE {} {}", series.name, series.kind.as_str());
            for (label_values, value) in &series.values {
                if series.label_names.is_empty() {
                    let _ = writeln!(out, "{} {}", series.name, value);
                } else {
                    let pairs: Vec<String> = series
                        .label_names
                        .iter()
                        .zip(label_values)
                        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label(value)))
                        .collect();
                    let _ = writeln!(out, "{}{{{}}} {}", series.name, pairs.join(","), value);
                }
            }
        }
        out
    }

    /// Validate kind and label arity before handing out the series.
    fn checked_series(
        &mut self,
        handle: SeriesHandle,
        expected: MetricKind,
        label_values: &[&str],
    ) -> Result<&mut MetricSeries, RegistryError> {
        let series = self
            .series
            .get_mut(handle.0)
            .ok_or(RegistryError::UnknownHandle { index: handle.0 })?;
        if series.kind != expected {
            return Err(RegistryError::KindMismatch {
                name: series.name.clone(),
                expected: expected.as_str(),
                actual: series.kind.as_str(),
            });
        }
        if series.label_names.len() != label_values.len() {
            return Err(RegistryError::LabelArity {
                name: series.name.clone(),
                expected: series.label_names.len(),
                got: label_values.len(),
            });
        }
        Ok(series)
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
