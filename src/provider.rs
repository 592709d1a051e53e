// 📥 Field-Set Providers - derive source fields from sample files
// Providers only name the columns. Every inferred field is an optional
// string; types are chosen by whoever authors the mapping.

use crate::schema::Field;
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

/// Source of a Source Field Set
pub trait FieldSetProvider: Send + Sync {
    /// Read the file and return one field per column
    fn infer_fields(&self, path: &Path) -> Result<Vec<Field>>;

    /// Provider label for logs
    fn name(&self) -> &str;
}

/// Reads the header row of a CSV file
#[derive(Debug, Clone, Copy)]
pub struct CsvHeaderProvider {
    delimiter: u8,
}

impl CsvHeaderProvider {
    pub fn new() -> Self {
        CsvHeaderProvider { delimiter: b',' }
    }

    /// Builder: use a different column delimiter (e.g. b';')
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn open(&self, path: &Path) -> Result<csv::Reader<File>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        Ok(ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .trim(csv::Trim::All)
            .from_reader(file))
    }

    /// Every data row as a JSON object keyed by header, values as strings.
    /// Empty cells are left out so they read as absent.
    pub fn read_records(&self, path: &Path) -> Result<Vec<Value>> {
        let mut reader = self.open(path)?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header in {}", path.display()))?
            .clone();

        let mut records = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse CSV line {} in {}", line_num + 2, path.display())
            })?;
            let mut row = Map::new();
            for (header, cell) in headers.iter().zip(record.iter()) {
                if !header.is_empty() && !cell.is_empty() {
                    row.insert(header.to_string(), Value::String(cell.to_string()));
                }
            }
            records.push(Value::Object(row));
        }
        Ok(records)
    }
}

impl Default for CsvHeaderProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldSetProvider for CsvHeaderProvider {
    fn infer_fields(&self, path: &Path) -> Result<Vec<Field>> {
        let mut reader = self.open(path)?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read CSV header in {}", path.display()))?;

        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for header in headers.iter() {
            if header.is_empty() {
                continue;
            }
            if !seen.insert(header.to_string()) {
                warn!(column = %header, "Skipping repeated CSV column");
                continue;
            }
            fields.push(Field::string(header));
        }

        if fields.is_empty() {
            bail!("No column names found in {}", path.display());
        }
        info!(provider = self.name(), columns = fields.len(), "Inferred source fields from {}", path.display());
        Ok(fields)
    }

    fn name(&self) -> &str {
        "csv_header"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_headers_become_optional_string_fields() {
        let file = csv_file(" TRADE_ID , AMT,VAL_DATE\nT1,100.5,01/02/2024\n");
        let fields = CsvHeaderProvider::new().infer_fields(file.path()).unwrap();

        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["TRADE_ID", "AMT", "VAL_DATE"]);
        assert!(fields.iter().all(|f| !f.required && f.data_type() == DataType::String));
    }

    #[test]
    fn test_blank_and_repeated_headers_are_skipped() {
        let file = csv_file("A,,A,B\n1,2,3,4\n");
        let fields = CsvHeaderProvider::new().infer_fields(file.path()).unwrap();
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_custom_delimiter() {
        let file = csv_file("A;B\n1;2\n");
        let fields = CsvHeaderProvider::new()
            .with_delimiter(b';')
            .infer_fields(file.path())
            .unwrap();
        assert_eq!(fields[1].name, "B");
    }

    #[test]
    fn test_empty_file_fails() {
        let file = csv_file("");
        assert!(CsvHeaderProvider::new().infer_fields(file.path()).is_err());
        assert!(CsvHeaderProvider::new()
            .infer_fields(Path::new("/nonexistent/input.csv"))
            .is_err());
    }

    #[test]
    fn test_read_records_skips_empty_cells() {
        let file = csv_file("TRADE_ID,AMT\nT1,100\nT2,\n");
        let records = CsvHeaderProvider::new().read_records(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["AMT"], "100");
        assert!(records[1].get("AMT").is_none());
    }
}
