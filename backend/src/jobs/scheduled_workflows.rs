// Scheduled Workflow Job - Runs a Scheduled workflow over every record of its type

use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::WorkflowResult;
use crate::store::{RecordWriter, WorkflowStore};
use crate::workflows::{TriggerContext, TriggerType, WorkflowEngine};

pub struct ScheduledWorkflowJob {
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn WorkflowStore>,
    records: Arc<dyn RecordWriter>,
    workflow_id: Uuid,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScheduledRunResult {
    pub records_checked: usize,
    pub records_matched: usize,
    pub actions_failed: usize,
}

impl ScheduledWorkflowJob {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn WorkflowStore>,
        records: Arc<dyn RecordWriter>,
        workflow_id: Uuid,
    ) -> Self {
        Self {
            engine,
            store,
            records,
            workflow_id,
        }
    }

    /// Re-reads the workflow so edits and deactivation apply from the next
    /// tick on.
    pub async fn run(&self) -> WorkflowResult<ScheduledRunResult> {
        let workflow = match self.store.load_workflow(self.workflow_id).await? {
            Some(workflow) if workflow.is_active && workflow.trigger_type == TriggerType::Scheduled => workflow,
            Some(workflow) => {
                debug!("Scheduled workflow '{}' is no longer active; skipping", workflow.name);
                return Ok(ScheduledRunResult::default());
            }
            None => {
                debug!("Scheduled workflow {} no longer exists; skipping", self.workflow_id);
                return Ok(ScheduledRunResult::default());
            }
        };

        let records = self.records.load_records(&workflow.record_type).await?;
        let mut result = ScheduledRunResult {
            records_checked: records.len(),
            ..Default::default()
        };
        let context = TriggerContext::new();

        for mut record in records {
            let outcome = self
                .engine
                .process_workflow(&workflow, &mut record, TriggerType::Scheduled, &context)
                .await;
            if outcome.workflows_matched > 0 {
                result.records_matched += 1;
            }
            result.actions_failed += outcome.actions_failed;
        }

        if result.actions_failed > 0 {
            error!(
                "Scheduled workflow '{}' had {} failed action(s)",
                workflow.name, result.actions_failed
            );
        }
        info!(
            "Scheduled workflow '{}': {} of {} records matched",
            workflow.name, result.records_matched, result.records_checked
        );

        Ok(result)
    }
}

/// Cron expressions with five fields get a leading seconds field.
pub fn normalize_cron(expression: &str) -> String {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}
