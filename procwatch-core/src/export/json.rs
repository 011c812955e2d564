use super::{create_output, persist, Exporter, ExporterRegistry};
use crate::config::ExportConfig;
use crate::dataset::CompiledTable;
use crate::error::ExportError;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub(super) fn register(registry: &mut ExporterRegistry) {
    registry.register(JsonExporter::NAME, |config| Box::new(JsonExporter::new(config.clone())));
}

/// The compiled table as pretty printed JSON.
pub struct JsonExporter {
    config: ExportConfig,
}

impl JsonExporter {
    pub const NAME: &'static str = "json";

    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }
}

impl Exporter for JsonExporter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn export(&self, table: &CompiledTable) -> Result<PathBuf, ExportError> {
        let mut file = create_output(&self.config, table, self.extension())?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, table)?;
            writer.flush()?;
        }
        persist(file)
    }
}
