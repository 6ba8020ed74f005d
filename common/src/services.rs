// Collaborator lookup for step setters

use crate::step::{ItemProcessor, ItemReader, ItemWriter};
use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A collaborator a step can be wired with, typed by capability
#[derive(Clone)]
pub enum Service {
    Reader(Arc<dyn ItemReader>),
    Processor(Arc<dyn ItemProcessor>),
    Writer(Arc<dyn ItemWriter>),
    /// Anything a custom handler knows how to downcast
    Other(Arc<dyn Any + Send + Sync>),
}

impl Service {
    pub fn capability(&self) -> &'static str {
        match self {
            Service::Reader(_) => "reader",
            Service::Processor(_) => "processor",
            Service::Writer(_) => "writer",
            Service::Other(_) => "other",
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service::{}", self.capability())
    }
}

/// Resolves collaborator reference ids to services
pub trait ServiceLocator: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Service>;
}

/// String-keyed service locator, built explicitly at startup
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `id`, returning the service it replaced
    pub fn register(&mut self, id: impl Into<String>, service: Service) -> Option<Service> {
        self.services.insert(id.into(), service)
    }

    pub fn with(mut self, id: impl Into<String>, service: Service) -> Self {
        self.register(id, service);
        self
    }

    pub fn ids(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceLocator for ServiceRegistry {
    fn resolve(&self, id: &str) -> Option<Service> {
        self.services.get(id).cloned()
    }
}
