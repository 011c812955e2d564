use super::{create_output, persist, Exporter, ExporterRegistry};
use crate::config::ExportConfig;
use crate::dataset::CompiledTable;
use crate::error::ExportError;
use std::borrow::Cow;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub(super) fn register(registry: &mut ExporterRegistry) {
    registry.register(CsvExporter::NAME, |config| Box::new(CsvExporter::new(config.clone())));
}

/// Quotes a field holding a separator, a quote or a line break (RFC 4180).
fn quote(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Comma separated values, one line per frame. Missing samples are empty cells.
pub struct CsvExporter {
    config: ExportConfig,
}

impl CsvExporter {
    pub const NAME: &'static str = "csv";

    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }
}

impl Exporter for CsvExporter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn extension(&self) -> &'static str {
        "csv"
    }

    fn export(&self, table: &CompiledTable) -> Result<PathBuf, ExportError> {
        let mut file = create_output(&self.config, table, self.extension())?;

        {
            let mut writer = BufWriter::new(file.as_file_mut());

            write!(writer, "timestamp")?;
            for column in &table.columns {
                write!(writer, ",{}", quote(column))?;
            }
            writeln!(writer)?;

            for row in &table.rows {
                write!(writer, "{}", row.timestamp.to_rfc3339())?;
                for value in &row.values {
                    match value {
                        Some(value) => write!(writer, ",{}", value)?,
                        None => write!(writer, ",")?,
                    }
                }
                writeln!(writer)?;
            }

            writer.flush()?;
        }

        persist(file)
    }
}
