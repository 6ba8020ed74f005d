// Batch job engine: declarative job configuration, a frozen job registry,
// a step-by-step execution engine and its persistence gateway

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod measure;
pub mod models;
pub mod registry;
pub mod services;
pub mod step;
pub mod telemetry;
