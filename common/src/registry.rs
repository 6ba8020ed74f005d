// Job definition registry
// Write-once at startup, read-only once frozen

use crate::errors::RegistryError;
use crate::models::{JobDefinition, JobType};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument};

/// Holds named job definitions in registration order
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<IndexMap<String, Arc<JobDefinition>>>,
    frozen: AtomicBool,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every definition, then freeze the registry
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = JobDefinition>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        registry.freeze();
        Ok(registry)
    }

    #[instrument(skip(self, definition), fields(job_name = %definition.name))]
    pub fn register(&self, definition: JobDefinition) -> Result<(), RegistryError> {
        let mut jobs = self.write();

        // Checked under the write lock so a concurrent freeze cannot interleave
        if self.frozen.load(Ordering::Acquire) {
            return Err(RegistryError::RegistryFrozen(definition.name));
        }
        if jobs.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateJob(definition.name));
        }

        debug!(
            connector = %definition.connector,
            step_count = definition.steps.len(),
            "Job registered"
        );
        jobs.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Refuse any further registration
    pub fn freeze(&self) {
        let jobs = self.write();
        if !self.frozen.swap(true, Ordering::AcqRel) {
            info!(job_count = jobs.len(), "Job registry frozen");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn get(&self, name: &str) -> Result<Arc<JobDefinition>, RegistryError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<JobDefinition>> {
        self.read().values().cloned().collect()
    }

    pub fn list_by_connector(&self, connector: &str) -> Vec<Arc<JobDefinition>> {
        self.read()
            .values()
            .filter(|job| job.connector == connector)
            .cloned()
            .collect()
    }

    pub fn list_by_type(&self, job_type: JobType) -> Vec<Arc<JobDefinition>> {
        self.read()
            .values()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-written, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Arc<JobDefinition>>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Arc<JobDefinition>>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
