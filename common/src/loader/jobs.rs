// Job fragment schema (`batch_jobs.yml`)
//
// name: acme_connector
// jobs:
//   product_import:
//     title: Product import
//     type: import
//     steps:
//       - title: Import products
//         class: item_step            # optional, defaults to item_step
//         services:  { reader: acme.csv_reader, writer: acme.product_writer }
//         parameters: { batch_size: 50 }

use super::deserialize_fragment;
use crate::errors::ConfigError;
use crate::models::{JobDefinition, JobType, StepDefinition, DEFAULT_STEP_HANDLER};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnector {
    name: Option<String>,
    #[serde(default)]
    jobs: IndexMap<String, RawJob>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJob {
    title: Option<String>,
    #[serde(rename = "type")]
    job_type: Option<String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    alias: Option<String>,
    title: Option<String>,
    #[serde(alias = "handler", alias = "handler_ref")]
    class: Option<String>,
    #[serde(default)]
    services: IndexMap<String, String>,
    #[serde(default)]
    parameters: IndexMap<String, serde_yaml::Value>,
}

/// Parse and validate one module's job fragment.
///
/// Error paths are rooted at the module name, e.g.
/// `catalog.jobs.product_import.steps[0].title`.
pub fn parse_job_fragment(
    module: &str,
    content: &str,
) -> Result<IndexMap<String, JobDefinition>, ConfigError> {
    let raw: RawConnector = deserialize_fragment(module, content)?;

    let connector = required(raw.name, &format!("{}.name", module))?;

    let mut jobs = IndexMap::new();
    for (job_name, raw_job) in raw.jobs {
        let path = format!("{}.jobs.{}", module, job_name);
        let job = build_job(&connector, &job_name, raw_job, &path)?;
        jobs.insert(job_name, job);
    }

    Ok(jobs)
}

fn build_job(
    connector: &str,
    name: &str,
    raw: RawJob,
    path: &str,
) -> Result<JobDefinition, ConfigError> {
    let title = required(raw.title, &format!("{}.title", path))?;
    let type_path = format!("{}.type", path);
    let job_type = required(raw.job_type, &type_path)?;
    let job_type =
        JobType::from_str(&job_type).map_err(|reason| ConfigError::schema(&type_path, reason))?;

    if raw.steps.is_empty() {
        return Err(ConfigError::schema(
            format!("{}.steps", path),
            "a job needs at least one step",
        ));
    }

    let mut aliases = HashSet::new();
    let mut steps = Vec::with_capacity(raw.steps.len());
    for (index, raw_step) in raw.steps.into_iter().enumerate() {
        let step_path = format!("{}.steps[{}]", path, index);
        let step = build_step(raw_step, &step_path)?;
        if !aliases.insert(step.alias.clone()) {
            return Err(ConfigError::schema(
                format!("{}.alias", step_path),
                format!("duplicate step alias '{}'", step.alias),
            ));
        }
        steps.push(step);
    }

    Ok(JobDefinition {
        connector: connector.to_string(),
        name: name.to_string(),
        title,
        job_type,
        steps,
    })
}

fn build_step(raw: RawStep, path: &str) -> Result<StepDefinition, ConfigError> {
    let title = required(raw.title, &format!("{}.title", path))?;
    let alias = match raw.alias {
        Some(alias) => required(Some(alias), &format!("{}.alias", path))?,
        None => title.clone(),
    };
    let handler_ref = match raw.class {
        Some(class) => required(Some(class), &format!("{}.class", path))?,
        None => DEFAULT_STEP_HANDLER.to_string(),
    };

    for (setter, reference) in &raw.services {
        if reference.trim().is_empty() {
            return Err(ConfigError::schema(
                format!("{}.services.{}", path, setter),
                "service reference cannot be empty",
            ));
        }
    }

    let mut parameters = IndexMap::with_capacity(raw.parameters.len());
    for (setter, value) in raw.parameters {
        let param_path = format!("{}.parameters.{}", path, setter);
        if raw.services.contains_key(&setter) {
            return Err(ConfigError::schema(
                param_path,
                "setter is already bound in services",
            ));
        }
        let value = scalar_to_json(&value)
            .ok_or_else(|| ConfigError::schema(&param_path, "parameters must be scalar values"))?;
        parameters.insert(setter, value);
    }

    Ok(StepDefinition {
        alias,
        title,
        handler_ref,
        services: raw.services,
        parameters,
    })
}

fn required(value: Option<String>, path: &str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(ConfigError::schema(path, "value cannot be empty")),
        None => Err(ConfigError::schema(path, "missing required field")),
    }
}

fn scalar_to_json(value: &serde_yaml::Value) -> Option<serde_json::Value> {
    match value {
        serde_yaml::Value::Null => Some(serde_json::Value::Null),
        serde_yaml::Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(serde_json::Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(serde_json::Value::from(u))
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
            }
        }
        serde_yaml::Value::String(s) => Some(serde_json::Value::String(s.clone())),
        _ => None,
    }
}
