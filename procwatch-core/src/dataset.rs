use crate::error::ExportError;
use crate::export::Exporter;
use crate::metrics::{AttributeDataSet, AttributeValue};
use crate::process::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error};

/// Samples taken by one successful [`ProcessDataSet::record`] call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    /// Kinds whose sampler failed this tick are absent.
    pub values: HashMap<&'static str, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<Option<AttributeValue>>,
}

/// Row-per-frame, column-per-attribute view over a [`ProcessDataSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledTable {
    pub pid: u32,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl CompiledTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, kind: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == kind)
    }
}

/// Time series of attribute samples for a single process.
///
/// Not synchronized: share it across threads behind your own lock.
pub struct ProcessDataSet {
    target: ProcessHandle,
    attributes: Vec<Box<dyn AttributeDataSet>>,
    frames: Vec<Frame>,
    last_export_error: Option<String>,
}

impl ProcessDataSet {
    pub fn new(target: ProcessHandle) -> Self {
        Self {
            target,
            attributes: Vec::new(),
            frames: Vec::new(),
            last_export_error: None,
        }
    }

    /// Registers a sampler. Returns false, leaving the set unchanged, when a
    /// sampler of the same kind is already present.
    pub fn add_attribute_data_set(&mut self, data_set: Box<dyn AttributeDataSet>) -> bool {
        let kind = data_set.kind();
        if self.attributes.iter().any(|a| a.kind() == kind) {
            debug!(pid = self.target.id(), kind, "rejected duplicate attribute data set");
            return false;
        }
        self.attributes.push(data_set);
        true
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Samples every registered attribute, in registration order.
    ///
    /// Returns true iff a frame was appended. A target that is not running
    /// (or exits while being sampled) produces no frame. Any other sampler
    /// failure only leaves that attribute's cell empty.
    pub fn record(&mut self) -> bool {
        let pid = self.target.id();
        if !self.target.is_alive() {
            debug!(pid, "target not running, no frame recorded");
            return false;
        }

        let now = Instant::now();
        let timestamp = Utc::now();
        let mut values = HashMap::with_capacity(self.attributes.len());

        for attribute in &mut self.attributes {
            match attribute.record(&self.target, now) {
                Ok(()) => {
                    if let Some(value) = attribute.last_value() {
                        values.insert(attribute.kind(), value);
                    }
                }
                Err(err) if err.is_process_gone() => {
                    debug!(pid, kind = attribute.kind(), "target exited mid-record");
                    return false;
                }
                Err(err) => {
                    debug!(pid, kind = attribute.kind(), error = %err, "sample missing");
                }
            }
        }

        self.frames.push(Frame { timestamp, values });
        true
    }

    /// Builds a table of every frame recorded so far. Frames are left intact.
    pub fn compile(&self) -> CompiledTable {
        let columns: Vec<&'static str> = self.attributes.iter().map(|a| a.kind()).collect();

        let rows = self
            .frames
            .iter()
            .map(|frame| Row {
                timestamp: frame.timestamp,
                values: columns.iter().map(|kind| frame.values.get(kind).copied()).collect(),
            })
            .collect();

        CompiledTable {
            pid: self.target.id(),
            columns: columns.into_iter().map(str::to_string).collect(),
            rows,
        }
    }

    /// Compiles and hands the table to `exporter`.
    ///
    /// Exporter errors and panics come back as [`ExportError`]; the message of
    /// the most recent failure stays available via [`last_export_error`].
    ///
    /// [`last_export_error`]: ProcessDataSet::last_export_error
    pub fn export(&mut self, exporter: &dyn Exporter) -> Result<PathBuf, ExportError> {
        let table = self.compile();

        let result = panic::catch_unwind(AssertUnwindSafe(|| exporter.export(&table)))
            .unwrap_or_else(|_| Err(ExportError::ExporterPanicked(exporter.name())));

        match &result {
            Ok(path) => {
                debug!(pid = table.pid, exporter = exporter.name(), path = %path.display(), "exported");
                self.last_export_error = None;
            }
            Err(err) => {
                error!(pid = table.pid, exporter = exporter.name(), error = %err, "export failed");
                self.last_export_error = Some(err.to_string());
            }
        }

        result
    }

    pub fn last_export_error(&self) -> Option<&str> {
        self.last_export_error.as_deref()
    }
}
