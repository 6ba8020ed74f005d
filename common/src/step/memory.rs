// In-process item sources and sinks

use super::item::{ItemProcessor, ItemReader, ItemWriter};
use crate::errors::StepError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// Reader over a fixed list of items
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    items: Vec<Value>,
}

impl MemoryReader {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl ItemReader for MemoryReader {
    async fn read(&self, offset: usize, limit: usize) -> Result<Vec<Value>, StepError> {
        Ok(self.items.iter().skip(offset).take(limit).cloned().collect())
    }
}

/// Writer collecting everything it receives
#[derive(Debug, Default)]
pub struct MemoryWriter {
    items: Mutex<Vec<Value>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items written so far, in write order
    pub fn items(&self) -> Vec<Value> {
        match self.items.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ItemWriter for MemoryWriter {
    async fn write(&self, items: &[Value]) -> Result<(), StepError> {
        let mut stored = self
            .items
            .lock()
            .map_err(|_| StepError::WriteFailed("memory writer lock poisoned".to_string()))?;
        stored.extend_from_slice(items);
        Ok(())
    }
}

/// Processor that returns every item unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl ItemProcessor for PassthroughProcessor {
    async fn process(&self, item: Value) -> Result<Option<Value>, StepError> {
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reader_pages_by_offset() {
        let reader = MemoryReader::new((0..5).map(|n| json!(n)).collect());
        assert_eq!(reader.read(0, 2).await.unwrap(), vec![json!(0), json!(1)]);
        assert_eq!(reader.read(4, 2).await.unwrap(), vec![json!(4)]);
        assert!(reader.read(5, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writer_appends() {
        let writer = MemoryWriter::new();
        writer.write(&[json!("a")]).await.unwrap();
        writer.write(&[json!("b"), json!("c")]).await.unwrap();
        assert_eq!(writer.items(), vec![json!("a"), json!("b"), json!("c")]);
    }
}
