// Chunk-oriented item step: read, process, write

use super::{StepConfig, StepContext, StepHandler};
use crate::errors::StepError;
use crate::telemetry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Batch size used when a step does not set `batch_size`
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Source of items. `read` returns at most `limit` items starting at
/// `offset`; an empty result means the source is exhausted.
#[async_trait]
pub trait ItemReader: Send + Sync {
    async fn read(&self, offset: usize, limit: usize) -> Result<Vec<Value>, StepError>;
}

/// Transforms one item. `Ok(None)` filters the item out.
/// `StepError::InvalidItem` skips the item without failing the step.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: Value) -> Result<Option<Value>, StepError>;
}

/// Sink for processed chunks
#[async_trait]
pub trait ItemWriter: Send + Sync {
    async fn write(&self, items: &[Value]) -> Result<(), StepError>;
}

/// Default step handler, registered as `item_step`
///
/// Setters: `reader` (required), `processor` (optional), `writer` (required).
/// Parameters: `batch_size` (positive integer).
pub struct ItemStep {
    reader: Arc<dyn ItemReader>,
    processor: Option<Arc<dyn ItemProcessor>>,
    writer: Arc<dyn ItemWriter>,
    batch_size: usize,
}

impl ItemStep {
    const SERVICES: [&'static str; 3] = ["reader", "processor", "writer"];
    const PARAMETERS: [&'static str; 1] = ["batch_size"];

    pub fn new(
        reader: Arc<dyn ItemReader>,
        processor: Option<Arc<dyn ItemProcessor>>,
        writer: Arc<dyn ItemWriter>,
        batch_size: usize,
    ) -> Self {
        Self {
            reader,
            processor,
            writer,
            batch_size,
        }
    }

    /// Build the step from its resolved configuration
    pub fn from_config(config: &StepConfig, default_batch_size: usize) -> Result<Self, StepError> {
        config.ensure_known_setters(&Self::SERVICES, &Self::PARAMETERS)?;

        Ok(Self::new(
            config.reader("reader")?,
            config.optional_processor("processor")?,
            config.writer("writer")?,
            config.parameter_usize("batch_size", default_batch_size)?,
        ))
    }

    async fn process_chunk(
        &self,
        chunk: Vec<Value>,
        ctx: &mut StepContext,
    ) -> Result<Vec<Value>, StepError> {
        let Some(processor) = &self.processor else {
            return Ok(chunk);
        };

        let mut processed = Vec::with_capacity(chunk.len());
        for item in chunk {
            match processor.process(item).await {
                Ok(Some(item)) => processed.push(item),
                Ok(None) => ctx.step_execution_mut().filter_count += 1,
                Err(StepError::InvalidItem(reason)) => {
                    warn!(reason = %reason, "Item skipped");
                    ctx.step_execution_mut().add_warning(reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(processed)
    }
}

#[async_trait]
impl StepHandler for ItemStep {
    #[instrument(skip(self, ctx), fields(step_alias = %ctx.step_execution().step_alias, batch_size = self.batch_size))]
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), StepError> {
        let mut offset = 0;

        loop {
            let chunk = self.reader.read(offset, self.batch_size).await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len();
            ctx.step_execution_mut().read_count += chunk.len() as u64;

            let processed = self.process_chunk(chunk, ctx).await?;
            if !processed.is_empty() {
                self.writer.write(&processed).await?;
                ctx.step_execution_mut().write_count += processed.len() as u64;
                telemetry::record_step_items(&ctx.step_execution().step_alias, processed.len() as u64);
            }

            debug!(offset, written = processed.len(), "Chunk committed");
            ctx.commit().await?;
        }

        let execution = ctx.step_execution();
        info!(
            read_count = execution.read_count,
            write_count = execution.write_count,
            filter_count = execution.filter_count,
            error_count = execution.error_count,
            "Item step finished"
        );
        Ok(())
    }
}
