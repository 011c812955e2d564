pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod metrics;
pub mod process;
mod subscribers;
pub mod watcher;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;

pub use config::{ExportConfig, WatcherConfig};
pub use dataset::{CompiledTable, Frame, ProcessDataSet, Row};
pub use error::{ExportError, SampleError, SourceError, WatcherError};
pub use export::{CsvExporter, Exporter, ExporterRegistry, JsonExporter};
pub use metrics::*;
pub use process::{ProcessHandle, ProcessSource, SystemSource};
pub use watcher::{ProcessDiff, ProcessWatcher, Subscription, WatchSession, WatcherEvent, WatcherState};
