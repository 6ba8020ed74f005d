// Configuration loader: discovers declarative fragments contributed by
// plugin modules, merges and validates them.

pub mod jobs;
pub mod measure;
pub mod merge;

use crate::errors::ConfigError;
use crate::models::JobDefinition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

pub use jobs::parse_job_fragment;
pub use measure::{ConversionOp, MeasureConfig, MeasureFamily, UnitConfig};
pub use merge::{merge_extend, merge_unique};

/// File holding a module's job declarations
pub const JOBS_FILE_NAME: &str = "batch_jobs.yml";

/// File holding a module's measure families
pub const MEASURE_FILE_NAME: &str = "measure.yml";

/// A plugin module taking part in configuration loading. Modules are loaded
/// in the order they are listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleManifest {
    pub name: String,
    pub path: PathBuf,
}

impl ModuleManifest {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Raw content of one module's configuration file
#[derive(Debug, Clone)]
pub struct Fragment {
    pub module: String,
    pub path: PathBuf,
    pub content: String,
}

/// Read `file_name` from every module that provides it, in manifest order.
/// Modules without the file are skipped.
#[instrument(skip(modules), fields(module_count = modules.len()))]
pub fn discover_fragments(
    modules: &[ModuleManifest],
    file_name: &str,
) -> Result<Vec<Fragment>, ConfigError> {
    let mut fragments = Vec::new();

    for module in modules {
        let path = module.path.join(file_name);
        if !path.is_file() {
            debug!(module = %module.name, path = %path.display(), "No fragment in module");
            continue;
        }

        let content = read_file(&path)?;
        debug!(module = %module.name, path = %path.display(), "Fragment discovered");
        fragments.push(Fragment {
            module: module.name.clone(),
            path,
            content,
        });
    }

    Ok(fragments)
}

/// Load every job definition declared by `modules`. Job names must be
/// unique across modules; order is module order, then declaration order.
#[instrument(skip(modules))]
pub fn load_job_definitions(modules: &[ModuleManifest]) -> Result<Vec<JobDefinition>, ConfigError> {
    let fragments = discover_fragments(modules, JOBS_FILE_NAME)?
        .into_iter()
        .map(|fragment| {
            parse_job_fragment(&fragment.module, &fragment.content)
                .map(|jobs| (fragment.module, jobs))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let merged = merge_unique(fragments)?;

    info!(job_count = merged.len(), "Job definitions loaded");
    Ok(merged.into_values().collect())
}

/// Load and merge the measure families declared by `modules`
#[instrument(skip(modules))]
pub fn load_measure_config(modules: &[ModuleManifest]) -> Result<MeasureConfig, ConfigError> {
    let fragments = discover_fragments(modules, MEASURE_FILE_NAME)?
        .into_iter()
        .map(|fragment| {
            measure::parse_measure_fragment(&fragment.module, &fragment.content)
                .map(|families| (fragment.module, families))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let config = measure::merge_measure_fragments(fragments)?;

    info!(family_count = config.families.len(), "Measure families loaded");
    Ok(config)
}

/// Parse `content` as YAML into `T`. Schema errors carry the dotted path of
/// the offending node, rooted at the module name.
pub(crate) fn deserialize_fragment<T: DeserializeOwned>(
    module: &str,
    content: &str,
) -> Result<T, ConfigError> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: module.to_string(),
            reason: e.to_string(),
        })?;

    serde_path_to_error::deserialize(document).map_err(|e| {
        let path = e.path().to_string();
        let path = if path == "." {
            module.to_string()
        } else {
            format!("{}.{}", module, path)
        };
        ConfigError::schema(path, e.inner().to_string())
    })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
