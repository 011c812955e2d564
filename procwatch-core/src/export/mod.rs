use crate::config::ExportConfig;
use crate::dataset::CompiledTable;
use crate::error::ExportError;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

mod csv;
mod json;

pub use self::csv::CsvExporter;
pub use self::json::JsonExporter;

pub trait Exporter: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extension of the produced files, without the dot.
    fn extension(&self) -> &'static str;

    /// Writes `table` to a new file and returns its path. Every call creates a
    /// distinct file owned by the caller.
    fn export(&self, table: &CompiledTable) -> Result<PathBuf, ExportError>;
}

pub type ExporterFactory = fn(&ExportConfig) -> Box<dyn Exporter>;

/// Known exporter types, keyed by name.
pub struct ExporterRegistry {
    config: ExportConfig,
    factories: BTreeMap<&'static str, ExporterFactory>,
}

impl ExporterRegistry {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            factories: BTreeMap::new(),
        }
    }

    pub fn builtin(config: ExportConfig) -> Self {
        let mut registry = Self::new(config);
        csv::register(&mut registry);
        json::register(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: ExporterFactory) -> bool {
        if self.factories.contains_key(name) {
            return false;
        }
        self.factories.insert(name, factory);
        true
    }

    pub fn discover(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn instantiate(&self, name: &str) -> Result<Box<dyn Exporter>, ExportError> {
        self.factories
            .get(name)
            .map(|factory| factory(&self.config))
            .ok_or_else(|| ExportError::UnknownExporter(name.to_string()))
    }
}

/// Opens a fresh, uniquely named file in the export directory.
fn create_output(
    config: &ExportConfig,
    table: &CompiledTable,
    extension: &str,
) -> Result<NamedTempFile, ExportError> {
    fs::create_dir_all(&config.output_dir)?;
    let file = tempfile::Builder::new()
        .prefix(&format!("procwatch-{}-", table.pid))
        .suffix(&format!(".{}", extension))
        .tempfile_in(&config.output_dir)?;
    Ok(file)
}

/// Flushes `file` and keeps it on disk past the end of the export.
fn persist(mut file: NamedTempFile) -> Result<PathBuf, ExportError> {
    file.flush()?;
    let (_, path) = file.keep()?;
    debug!(path = %path.display(), "export file written");
    Ok(path)
}
