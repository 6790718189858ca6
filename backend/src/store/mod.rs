// Persistence seams: workflow definitions, the execution log, follow-ups and
// the business records automation reads and writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use automation_shared::{ExecutionLog, FollowUp, TriggerType};
use crate::error::WorkflowResult;
use crate::workflows::{Action, Record, Workflow};

pub use memory::{InMemoryRecordStore, InMemoryWorkflowStore};
pub use postgres::{PgRecordStore, PgWorkflowStore};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Active workflows for a record type and trigger, with their rules and
    /// actions attached.
    async fn load_workflows(&self, record_type: &str, trigger: TriggerType) -> WorkflowResult<Vec<Workflow>>;

    /// Active `Scheduled` workflows that carry a schedule expression.
    async fn scheduled_workflows(&self) -> WorkflowResult<Vec<Workflow>>;

    /// One workflow by id, active or not.
    async fn load_workflow(&self, workflow_id: Uuid) -> WorkflowResult<Option<Workflow>>;

    async fn load_action(&self, action_id: Uuid) -> WorkflowResult<Option<Action>>;

    async fn append_log(&self, entry: &ExecutionLog) -> WorkflowResult<()>;

    async fn create_follow_up(&self, follow_up: &FollowUp) -> WorkflowResult<Uuid>;

    /// Merge changed field values into the stored record.
    async fn save_record_changes(
        &self,
        record_type: &str,
        record_id: &str,
        changes: &Map<String, Value>,
    ) -> WorkflowResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Returns the id of the new record.
    async fn create_record(&self, record_type: &str, fields: &Map<String, Value>) -> WorkflowResult<String>;

    /// Apply `fields` to every `record_type` record whose `link_field` equals
    /// `parent_id`. Returns the number of records touched.
    async fn update_related(
        &self,
        record_type: &str,
        link_field: &str,
        parent_id: &str,
        fields: &Map<String, Value>,
    ) -> WorkflowResult<u64>;

    async fn load_records(&self, record_type: &str) -> WorkflowResult<Vec<Record>>;
}
