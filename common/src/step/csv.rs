// CSV file reader and writer
// Rows are JSON objects keyed by the header line

use super::item::{ItemReader, ItemWriter};
use crate::errors::StepError;
use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument};

/// Reads a delimited file once and serves it in chunks
pub struct CsvFileReader {
    path: PathBuf,
    delimiter: u8,
    rows: OnceCell<Vec<Value>>,
}

impl CsvFileReader {
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter: delimiter as u8,
            rows: OnceCell::new(),
        }
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<Value>, StepError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            StepError::ReadFailed(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let rows = parse_rows(&data, self.delimiter)?;
        info!(rows = rows.len(), "CSV file loaded");
        Ok(rows)
    }
}

fn parse_rows(data: &[u8], delimiter: u8) -> Result<Vec<Value>, StepError> {
    let mut reader = ReaderBuilder::new().delimiter(delimiter).from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| StepError::ReadFailed(format!("Failed to parse CSV header: {}", e)))?
        .clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result
            .map_err(|e| StepError::ReadFailed(format!("Failed to parse CSV record: {}", e)))?;

        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, field)| (header.to_string(), coerce_field(field)))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

/// Integer, float and boolean fields become JSON scalars; empty fields null
fn coerce_field(field: &str) -> Value {
    if field.is_empty() {
        Value::Null
    } else if let Ok(num) = field.parse::<i64>() {
        json!(num)
    } else if let Ok(num) = field.parse::<f64>() {
        json!(num)
    } else if let Ok(b) = field.parse::<bool>() {
        json!(b)
    } else {
        json!(field)
    }
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => cell.to_string(),
    }
}

#[async_trait]
impl ItemReader for CsvFileReader {
    async fn read(&self, offset: usize, limit: usize) -> Result<Vec<Value>, StepError> {
        let rows = self.rows.get_or_try_init(|| self.load()).await?;
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }
}

/// Writes object items as delimited rows. The header is taken from the keys
/// of the first item written; the file is truncated on that first write and
/// appended to afterwards.
pub struct CsvFileWriter {
    path: PathBuf,
    delimiter: u8,
    header: Mutex<Option<Vec<String>>>,
}

impl CsvFileWriter {
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter: delimiter as u8,
            header: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(&self, header: Option<&[String]>, columns: &[String], items: &[Value]) -> Result<Vec<u8>, StepError> {
        let mut buffer = Vec::new();
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(&mut buffer);

        if let Some(header) = header {
            writer
                .write_record(header)
                .map_err(|e| StepError::WriteFailed(format!("Failed to write CSV header: {}", e)))?;
        }

        for item in items {
            let object = item.as_object().ok_or_else(|| {
                StepError::WriteFailed(format!("Expected an object item, got {}", item))
            })?;
            let cells: Vec<String> = columns
                .iter()
                .map(|column| object.get(column).map(cell_text).unwrap_or_default())
                .collect();
            writer
                .write_record(&cells)
                .map_err(|e| StepError::WriteFailed(format!("Failed to write CSV record: {}", e)))?;
        }

        writer
            .flush()
            .map_err(|e| StepError::WriteFailed(format!("Failed to flush CSV writer: {}", e)))?;
        drop(writer);
        Ok(buffer)
    }
}

#[async_trait]
impl ItemWriter for CsvFileWriter {
    #[instrument(skip(self, items), fields(path = %self.path.display(), count = items.len()))]
    async fn write(&self, items: &[Value]) -> Result<(), StepError> {
        let Some(first) = items.first() else {
            return Ok(());
        };

        let mut header = self.header.lock().await;
        let first_write = header.is_none();
        let columns = match header.as_ref() {
            Some(columns) => columns.clone(),
            None => first
                .as_object()
                .map(|object| object.keys().cloned().collect::<Vec<_>>())
                .ok_or_else(|| {
                    StepError::WriteFailed(format!("Expected an object item, got {}", first))
                })?,
        };

        let buffer = self.encode(first_write.then_some(columns.as_slice()), &columns, items)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(!first_write)
            .truncate(first_write)
            .open(&self.path)
            .await
            .map_err(|e| {
                StepError::WriteFailed(format!("Failed to open {}: {}", self.path.display(), e))
            })?;
        file.write_all(&buffer).await.map_err(|e| {
            StepError::WriteFailed(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        file.flush()
            .await
            .map_err(|e| StepError::WriteFailed(format!("Failed to flush {}: {}", self.path.display(), e)))?;

        if first_write {
            *header = Some(columns);
        }
        Ok(())
    }
}
