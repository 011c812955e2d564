use std::path::PathBuf;
use thiserror::Error;

/// Failure to take a single sample from a process.
#[derive(Error, Debug)]
pub enum SampleError {
    /// The process exited or its pid is no longer queryable. Expected, not a bug.
    #[error("process {0} is no longer running")]
    ProcessGone(u32),

    #[error("could not sample process {pid}: {reason}")]
    Transient { pid: u32, reason: String },

    #[error("{0} is not available on this platform")]
    Unsupported(&'static str),
}

impl SampleError {
    pub fn transient(pid: u32, reason: impl ToString) -> Self {
        SampleError::Transient {
            pid,
            reason: reason.to_string(),
        }
    }

    pub fn is_process_gone(&self) -> bool {
        matches!(self, SampleError::ProcessGone(_))
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("process snapshot unavailable: {0}")]
    Snapshot(String),
}

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("failed to spawn the polling thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stop_watching called while the watcher was not running")]
    NotWatching,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not keep export file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no exporter registered as '{0}'")]
    UnknownExporter(String),

    #[error("exporter '{0}' panicked")]
    ExporterPanicked(&'static str),
}

impl From<tempfile::PersistError> for ExportError {
    fn from(err: tempfile::PersistError) -> Self {
        ExportError::Persist {
            path: err.file.path().to_path_buf(),
            source: err.error,
        }
    }
}
