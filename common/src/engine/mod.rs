// Job execution engine

pub mod launcher;
pub mod step_executor;

pub use launcher::{JobLauncher, StopSignal};
pub use step_executor::StepExecutor;
