// Property-based tests for the execution engine
// Covers status monotonicity, step ordering on failure and item step counters

use async_trait::async_trait;
use batch_common::db::repositories::{InMemoryJobRepository, JobRepository};
use batch_common::engine::JobLauncher;
use batch_common::errors::StepError;
use batch_common::models::{BatchStatus, JobDefinition, JobInstance, JobType, StepDefinition};
use batch_common::registry::JobRegistry;
use batch_common::services::ServiceRegistry;
use batch_common::step::{
    HandlerRegistry, ItemProcessor, ItemStep, MemoryReader, MemoryWriter, StepConfig, StepContext,
    StepHandler,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::runtime::Runtime;

// ============================================================================
// Helpers
// ============================================================================

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Position of a status along the lifecycle; terminal statuses share a rank
fn rank(status: BatchStatus) -> u8 {
    match status {
        BatchStatus::Starting => 0,
        BatchStatus::Running => 1,
        BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Stopped => 2,
    }
}

fn arb_status() -> impl Strategy<Value = BatchStatus> {
    prop_oneof![
        Just(BatchStatus::Starting),
        Just(BatchStatus::Running),
        Just(BatchStatus::Completed),
        Just(BatchStatus::Failed),
        Just(BatchStatus::Stopped),
    ]
}

struct Succeed;

#[async_trait]
impl StepHandler for Succeed {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }
}

struct Fail;

#[async_trait]
impl StepHandler for Fail {
    async fn execute(&self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Err(StepError::Failed("rejected".to_string()))
    }
}

fn handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::with_defaults();
    handlers.register("succeed", |_: &StepConfig| {
        Ok(Box::new(Succeed) as Box<dyn StepHandler>)
    });
    handlers.register("fail", |_: &StepConfig| Ok(Box::new(Fail) as Box<dyn StepHandler>));
    handlers
}

/// A job of `len` steps where the step at `failing` (if any) fails
fn job(len: usize, failing: Option<usize>) -> JobDefinition {
    JobDefinition {
        connector: "acme".to_string(),
        name: "pipeline".to_string(),
        title: "Pipeline".to_string(),
        job_type: JobType::Import,
        steps: (0..len)
            .map(|i| {
                let handler = if Some(i) == failing { "fail" } else { "succeed" };
                StepDefinition::new(format!("step_{}", i), format!("Step {}", i)).with_handler(handler)
            })
            .collect(),
    }
}

/// Keeps even numbers, rejects multiples of five as invalid, filters the rest
struct Classify;

#[async_trait]
impl ItemProcessor for Classify {
    async fn process(&self, item: Value) -> Result<Option<Value>, StepError> {
        let n = item.as_i64().unwrap_or_default();
        if n % 5 == 0 {
            Err(StepError::InvalidItem(format!("{} is a multiple of five", n)))
        } else if n % 2 == 0 {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Whatever updates are attempted, the stored status never moves backwards
    /// and never leaves a terminal status
    #[test]
    fn property_stored_status_never_regresses(updates in prop::collection::vec(arb_status(), 1..12)) {
        runtime().block_on(async {
            let repository = InMemoryJobRepository::new();
            let mut execution = repository
                .create_job_execution(&JobInstance::new("pipeline", "prop"))
                .await
                .unwrap();

            let mut stored = execution.status;
            for next in updates {
                execution.status = next;
                let accepted = repository.update_job_execution(&execution).await.is_ok();
                prop_assert_eq!(accepted, stored.can_transition_to(next));

                let current = repository.find_job_execution(execution.id).await.unwrap().unwrap().status;
                prop_assert!(rank(current) >= rank(stored));
                if stored.is_terminal() {
                    prop_assert_eq!(current, stored);
                }
                stored = current;
            }
            Ok(())
        })?;
    }

    /// Steps run in declared order; the first failure ends the run with
    /// exactly the steps up to and including it recorded
    #[test]
    fn property_failure_stops_remaining_steps(len in 1usize..8, failing in prop::option::of(0usize..8)) {
        let failing = failing.filter(|index| *index < len);

        runtime().block_on(async {
            let registry = Arc::new(JobRegistry::from_definitions(vec![job(len, failing)]).unwrap());
            let repository = Arc::new(InMemoryJobRepository::new());
            let launcher = JobLauncher::new(
                registry,
                repository.clone(),
                Arc::new(ServiceRegistry::new()),
                Arc::new(handlers()),
            );

            let execution = launcher.start(&JobInstance::new("pipeline", "prop")).await.unwrap();
            let stored = repository.find_job_execution(execution.id).await.unwrap().unwrap();

            let expected_steps = failing.map_or(len, |index| index + 1);
            let aliases: Vec<String> = stored
                .step_executions
                .iter()
                .map(|step| step.step_alias.clone())
                .collect();
            let expected: Vec<String> = (0..expected_steps).map(|i| format!("step_{}", i)).collect();
            prop_assert_eq!(aliases, expected);

            match failing {
                Some(index) => {
                    prop_assert_eq!(stored.status, BatchStatus::Failed);
                    prop_assert_eq!(stored.step_executions[index].status, BatchStatus::Failed);
                    prop_assert!(stored.step_executions[..index]
                        .iter()
                        .all(|step| step.status == BatchStatus::Completed));
                }
                None => {
                    prop_assert_eq!(stored.status, BatchStatus::Completed);
                }
            }
            prop_assert!(launcher.running().is_empty());
            Ok(())
        })?;
    }

    /// Every item read is written, filtered or warned about, whatever the chunk size
    #[test]
    fn property_item_step_accounts_for_every_item(
        items in prop::collection::vec(1i64..1000, 0..60),
        batch_size in 1usize..16,
    ) {
        runtime().block_on(async {
            let repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
            let execution = repository
                .create_job_execution(&JobInstance::new("pipeline", "prop"))
                .await
                .unwrap();
            let step_execution = batch_common::models::StepExecution::new(execution.id, "items");
            repository.update_step_execution(&step_execution).await.unwrap();

            let writer = Arc::new(MemoryWriter::new());
            let step = ItemStep::new(
                Arc::new(MemoryReader::new(items.iter().map(|n| json!(n)).collect())),
                Some(Arc::new(Classify)),
                writer.clone(),
                batch_size,
            );

            let mut ctx = StepContext::new(step_execution, Arc::clone(&repository));
            step.execute(&mut ctx).await.unwrap();
            let counters = ctx.into_step_execution();

            let kept: Vec<Value> = items
                .iter()
                .filter(|n| *n % 5 != 0 && *n % 2 == 0)
                .map(|n| json!(n))
                .collect();
            let invalid = items.iter().filter(|n| *n % 5 == 0).count();

            prop_assert_eq!(counters.read_count as usize, items.len());
            prop_assert_eq!(counters.write_count as usize, kept.len());
            prop_assert_eq!(counters.warnings.len(), invalid);
            prop_assert_eq!(
                (counters.write_count + counters.filter_count) as usize + invalid,
                items.len()
            );
            prop_assert_eq!(writer.items(), kept);
            Ok(())
        })?;
    }
}
