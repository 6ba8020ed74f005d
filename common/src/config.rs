// Configuration management with layered configuration (file, env)

use crate::loader::ModuleManifest;
use crate::step::DEFAULT_BATCH_SIZE;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Job executions are kept in memory when no database is configured
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Plugin modules in load order
    #[serde(default)]
    pub modules: Vec<ModuleManifest>,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Built-in collaborator kinds that can be declared in settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    CsvReader,
    CsvWriter,
    Passthrough,
}

/// A collaborator registered with the service locator under `id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,
    pub kind: ServiceKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// Prometheus exporter is not installed when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: default.toml → local.toml → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if let Some(database) = &self.database {
            if database.url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
            if database.max_connections == 0 {
                return Err("Database max_connections must be greater than 0".to_string());
            }
            if database.min_connections > database.max_connections {
                return Err("Database min_connections cannot exceed max_connections".to_string());
            }
        }

        if self.batch.default_batch_size == 0 {
            return Err("Batch default_batch_size must be greater than 0".to_string());
        }

        let mut module_names = HashSet::new();
        for module in &self.batch.modules {
            if module.name.is_empty() {
                return Err("Batch module name cannot be empty".to_string());
            }
            if !module_names.insert(module.name.as_str()) {
                return Err(format!("Batch module '{}' is listed twice", module.name));
            }
        }

        let mut service_ids = HashSet::new();
        for service in &self.services {
            if service.id.is_empty() {
                return Err("Service id cannot be empty".to_string());
            }
            if !service_ids.insert(service.id.as_str()) {
                return Err(format!("Service '{}' is declared twice", service.id));
            }
            let needs_path = matches!(service.kind, ServiceKind::CsvReader | ServiceKind::CsvWriter);
            if needs_path && service.path.is_none() {
                return Err(format!("Service '{}' requires a path", service.id));
            }
            if !service.delimiter.is_ascii() {
                return Err(format!("Service '{}' delimiter must be ASCII", service.id));
            }
        }

        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn csv_service(id: &str) -> ServiceConfig {
        ServiceConfig {
            id: id.to_string(),
            kind: ServiceKind::CsvReader,
            path: Some(PathBuf::from("products.csv")),
            delimiter: ';',
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.database.is_none());
        assert_eq!(settings.batch.default_batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database = Some(DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_seconds: 5,
            run_migrations: true,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_batch_size() {
        let mut settings = Settings::default();
        settings.batch.default_batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_duplicate_modules() {
        let mut settings = Settings::default();
        settings.batch.modules = vec![
            ModuleManifest::new("catalog", "modules/catalog"),
            ModuleManifest::new("catalog", "modules/other"),
        ];
        assert!(settings.validate().unwrap_err().contains("catalog"));
    }

    #[test]
    fn test_validation_of_services() {
        let mut settings = Settings::default();
        settings.services = vec![csv_service("acme.reader"), csv_service("acme.reader")];
        assert!(settings.validate().is_err());

        let mut writer = csv_service("acme.writer");
        writer.kind = ServiceKind::CsvWriter;
        writer.path = None;
        settings.services = vec![writer];
        assert!(settings.validate().unwrap_err().contains("requires a path"));
    }

    #[test]
    fn test_load_from_path_reads_default_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[batch]
default_batch_size = 25

[[batch.modules]]
name = "catalog"
path = "modules/catalog"

[[services]]
id = "catalog.product_reader"
kind = "csv_reader"
path = "data/products.csv"
delimiter = ";"

[observability]
log_level = "debug"
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.batch.default_batch_size, 25);
        assert_eq!(settings.batch.modules[0].name, "catalog");
        assert_eq!(settings.services[0].kind, ServiceKind::CsvReader);
        assert_eq!(settings.services[0].delimiter, ';');
        assert_eq!(settings.observability.log_level, "debug");
        assert!(settings.database.is_none());
        assert!(settings.validate().is_ok());
    }
}
