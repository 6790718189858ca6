// Delayed Action Job - Runs actions whose delay has elapsed

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use automation_shared::ExecutionStatus;
use crate::error::WorkflowResult;
use crate::services::DelayedActionSource;
use crate::workflows::WorkflowEngine;

pub struct DelayedActionJob {
    engine: Arc<WorkflowEngine>,
    source: Arc<dyn DelayedActionSource>,
    batch_size: i64,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DelayedActionRunResult {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DelayedActionJob {
    pub fn new(engine: Arc<WorkflowEngine>, source: Arc<dyn DelayedActionSource>, batch_size: i64) -> Self {
        Self {
            engine,
            source,
            batch_size,
        }
    }

    pub async fn run(&self) -> WorkflowResult<DelayedActionRunResult> {
        let due = self.source.claim_due(Utc::now(), self.batch_size).await?;
        let mut result = DelayedActionRunResult {
            claimed: due.len(),
            ..Default::default()
        };

        for delayed in &due {
            let outcome = self.engine.run_delayed_action(delayed).await;
            if let Err(e) = self.source.complete(delayed.id).await {
                warn!("Delayed action {} ran but could not be completed: {}", delayed.id, e);
            }
            match outcome.status {
                ExecutionStatus::Failed => {
                    warn!("Delayed action {} failed: {}", delayed.action_id, outcome.message);
                    result.failed += 1;
                }
                ExecutionStatus::Skipped => result.skipped += 1,
                _ => result.succeeded += 1,
            }
        }

        if result.claimed > 0 {
            info!(
                "Delayed actions: {} claimed, {} succeeded, {} failed, {} skipped",
                result.claimed, result.succeeded, result.failed, result.skipped
            );
        }

        Ok(result)
    }
}
