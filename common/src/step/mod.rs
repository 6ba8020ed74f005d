// Step handlers and the context they run in

pub mod csv;
pub mod item;
pub mod memory;

use crate::db::repositories::JobRepository;
use crate::errors::StepError;
use crate::models::{StepExecution, DEFAULT_STEP_HANDLER};
use crate::services::Service;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use self::csv::{CsvFileReader, CsvFileWriter};
pub use item::{ItemProcessor, ItemReader, ItemStep, ItemWriter, DEFAULT_BATCH_SIZE};
pub use memory::{MemoryReader, MemoryWriter, PassthroughProcessor};

/// A unit of work bound to one step definition
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step. Counters live on the context's StepExecution; the engine
    /// records the final status from the returned result.
    async fn execute(&self, ctx: &mut StepContext) -> Result<(), StepError>;
}

/// Builds a handler from a step's resolved configuration
pub type HandlerFactory =
    Arc<dyn Fn(&StepConfig) -> Result<Box<dyn StepHandler>, StepError> + Send + Sync>;

/// A step definition with its service references resolved
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub alias: String,
    pub services: IndexMap<String, Service>,
    pub parameters: IndexMap<String, Value>,
}

impl StepConfig {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            services: IndexMap::new(),
            parameters: IndexMap::new(),
        }
    }

    pub fn with_service(mut self, setter: impl Into<String>, service: Service) -> Self {
        self.services.insert(setter.into(), service);
        self
    }

    pub fn with_parameter(mut self, setter: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(setter.into(), value);
        self
    }

    pub fn service(&self, setter: &str) -> Option<&Service> {
        self.services.get(setter)
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Reject any service setter not in `services` and any parameter not in
    /// `parameters`
    pub fn ensure_known_setters(&self, services: &[&str], parameters: &[&str]) -> Result<(), StepError> {
        reject_unknown(self.services.keys(), services, "service")?;
        reject_unknown(self.parameters.keys(), parameters, "parameter")
    }

    pub fn reader(&self, setter: &str) -> Result<Arc<dyn ItemReader>, StepError> {
        match self.service(setter) {
            Some(Service::Reader(reader)) => Ok(Arc::clone(reader)),
            Some(_) => Err(wrong_capability(setter, "reader")),
            None => Err(StepError::MissingService(setter.to_string())),
        }
    }

    pub fn optional_processor(
        &self,
        setter: &str,
    ) -> Result<Option<Arc<dyn ItemProcessor>>, StepError> {
        match self.service(setter) {
            Some(Service::Processor(processor)) => Ok(Some(Arc::clone(processor))),
            Some(_) => Err(wrong_capability(setter, "processor")),
            None => Ok(None),
        }
    }

    pub fn writer(&self, setter: &str) -> Result<Arc<dyn ItemWriter>, StepError> {
        match self.service(setter) {
            Some(Service::Writer(writer)) => Ok(Arc::clone(writer)),
            Some(_) => Err(wrong_capability(setter, "writer")),
            None => Err(StepError::MissingService(setter.to_string())),
        }
    }

    /// Positive integer parameter. Numeric strings are accepted.
    pub fn parameter_usize(&self, name: &str, default: usize) -> Result<usize, StepError> {
        let invalid = |reason: &str| StepError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let value = match self.parameter(name) {
            None | Some(Value::Null) => return Ok(default),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| invalid("must be a positive integer"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid("must be a positive integer"))?,
            Some(_) => return Err(invalid("must be a positive integer")),
        };

        if value == 0 {
            return Err(invalid("must be greater than zero"));
        }
        usize::try_from(value).map_err(|_| invalid("is too large"))
    }
}

fn reject_unknown<'a>(
    mut setters: impl Iterator<Item = &'a String>,
    known: &[&str],
    kind: &str,
) -> Result<(), StepError> {
    match setters.find(|setter| !known.contains(&setter.as_str())) {
        Some(setter) => Err(StepError::InvalidParameter {
            name: setter.clone(),
            reason: format!("unknown {} setter, expected one of: {}", kind, known.join(", ")),
        }),
        None => Ok(()),
    }
}

fn wrong_capability(setter: &str, expected: &str) -> StepError {
    StepError::WrongCapability {
        setter: setter.to_string(),
        expected: expected.to_string(),
    }
}

/// Mutable state handed to a running step
pub struct StepContext {
    step_execution: StepExecution,
    repository: Arc<dyn JobRepository>,
}

impl StepContext {
    pub fn new(step_execution: StepExecution, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            step_execution,
            repository,
        }
    }

    pub fn step_execution(&self) -> &StepExecution {
        &self.step_execution
    }

    pub fn step_execution_mut(&mut self) -> &mut StepExecution {
        &mut self.step_execution
    }

    /// Persist the current counters and warnings
    pub async fn commit(&mut self) -> Result<(), StepError> {
        self.repository
            .update_step_execution(&self.step_execution)
            .await?;
        Ok(())
    }

    pub fn into_step_execution(self) -> StepExecution {
        self.step_execution
    }
}

/// Maps `handler_ref` names to handler factories
#[derive(Clone)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry knowing `item_step` with the default batch size
    pub fn with_defaults() -> Self {
        Self::with_default_batch_size(DEFAULT_BATCH_SIZE)
    }

    /// A registry knowing `item_step`, using `batch_size` when a step sets none
    pub fn with_default_batch_size(batch_size: usize) -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_STEP_HANDLER, move |config: &StepConfig| {
            let step = ItemStep::from_config(config, batch_size)?;
            Ok(Box::new(step) as Box<dyn StepHandler>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&StepConfig) -> Result<Box<dyn StepHandler>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn factory(&self, name: &str) -> Option<HandlerFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_config() -> StepConfig {
        StepConfig::new("import")
            .with_service("reader", Service::Reader(Arc::new(MemoryReader::new(Vec::new()))))
            .with_service("writer", Service::Writer(Arc::new(MemoryWriter::new())))
    }

    #[test]
    fn test_parameter_usize() {
        let config = StepConfig::new("s")
            .with_parameter("a", json!(25))
            .with_parameter("b", json!("40"))
            .with_parameter("c", json!(0))
            .with_parameter("d", json!(-3))
            .with_parameter("e", json!(true));

        assert_eq!(config.parameter_usize("a", 100).unwrap(), 25);
        assert_eq!(config.parameter_usize("b", 100).unwrap(), 40);
        assert_eq!(config.parameter_usize("missing", 100).unwrap(), 100);
        for name in ["c", "d", "e"] {
            assert!(matches!(
                config.parameter_usize(name, 100),
                Err(StepError::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_capability_checks() {
        let config = StepConfig::new("s")
            .with_service("reader", Service::Writer(Arc::new(MemoryWriter::new())));

        assert!(matches!(
            config.reader("reader"),
            Err(StepError::WrongCapability { .. })
        ));
        assert!(matches!(
            config.writer("writer"),
            Err(StepError::MissingService(_))
        ));
        assert!(config.optional_processor("processor").unwrap().is_none());
    }

    #[test]
    fn test_default_registry_builds_item_step() {
        let registry = HandlerRegistry::with_defaults();
        let factory = registry.factory(DEFAULT_STEP_HANDLER).unwrap();
        assert!(factory(&item_config()).is_ok());
        assert!(registry.factory("tasklet").is_none());
    }

    #[test]
    fn test_setters_checked_per_kind() {
        let registry = HandlerRegistry::with_defaults();
        let factory = registry.factory(DEFAULT_STEP_HANDLER).unwrap();

        let parameter_as_service = item_config().with_service(
            "batch_size",
            Service::Writer(Arc::new(MemoryWriter::new())),
        );
        let err = factory(&parameter_as_service).err().unwrap();
        assert!(matches!(err, StepError::InvalidParameter { ref name, .. } if name == "batch_size"));

        let service_as_parameter = item_config().with_parameter("processor", json!("acme.p"));
        let err = factory(&service_as_parameter).err().unwrap();
        assert!(matches!(err, StepError::InvalidParameter { ref name, .. } if name == "processor"));
    }

    #[test]
    fn test_item_step_rejects_unknown_setter() {
        let registry = HandlerRegistry::with_defaults();
        let factory = registry.factory(DEFAULT_STEP_HANDLER).unwrap();
        let config = item_config().with_parameter("chunk", json!(5));

        let err = factory(&config).err().unwrap();
        assert!(matches!(err, StepError::InvalidParameter { ref name, .. } if name == "chunk"));
    }
}
