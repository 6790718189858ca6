use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use automation_shared::{ExecutionLog, FollowUp, TriggerType};
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflows::{Action, Record, Workflow};
use super::{RecordWriter, WorkflowStore};

/// Workflow definitions, logs and follow-ups held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    workflows: Arc<RwLock<Vec<Workflow>>>,
    logs: Arc<RwLock<Vec<ExecutionLog>>>,
    follow_ups: Arc<RwLock<Vec<FollowUp>>>,
    saved_changes: Arc<RwLock<HashMap<(String, String), Map<String, Value>>>>,
    fail_log_writes: Arc<AtomicBool>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows(workflows: Vec<Workflow>) -> Self {
        Self {
            workflows: Arc::new(RwLock::new(workflows)),
            ..Self::default()
        }
    }

    pub async fn add_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.push(workflow);
    }

    /// Toggle a stored workflow; returns false when no workflow has the id.
    pub async fn set_workflow_active(&self, workflow_id: Uuid, active: bool) -> bool {
        let mut workflows = self.workflows.write().await;
        match workflows.iter_mut().find(|w| w.id == workflow_id) {
            Some(workflow) => {
                workflow.is_active = active;
                true
            }
            None => false,
        }
    }

    pub async fn remove_workflow(&self, workflow_id: Uuid) {
        self.workflows.write().await.retain(|w| w.id != workflow_id);
    }

    pub async fn logs(&self) -> Vec<ExecutionLog> {
        self.logs.read().await.clone()
    }

    pub async fn follow_ups(&self) -> Vec<FollowUp> {
        self.follow_ups.read().await.clone()
    }

    /// Accumulated changes persisted for one record.
    pub async fn saved_changes(&self, record_type: &str, record_id: &str) -> Option<Map<String, Value>> {
        self.saved_changes
            .read()
            .await
            .get(&(record_type.to_string(), record_id.to_string()))
            .cloned()
    }

    /// Make every `append_log` call fail, as an unreachable log table would.
    pub fn set_log_writes_failing(&self, failing: bool) {
        self.fail_log_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load_workflows(&self, record_type: &str, trigger: TriggerType) -> WorkflowResult<Vec<Workflow>> {
        let mut matching: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .iter()
            .filter(|w| w.is_active && w.trigger_type == trigger && w.record_type == record_type)
            .cloned()
            .collect();
        matching.sort_by_key(|w| w.execution_order);
        Ok(matching)
    }

    async fn scheduled_workflows(&self) -> WorkflowResult<Vec<Workflow>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .filter(|w| w.is_active && w.trigger_type == TriggerType::Scheduled && w.schedule.is_some())
            .cloned()
            .collect())
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> WorkflowResult<Option<Workflow>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .find(|w| w.id == workflow_id)
            .cloned())
    }

    async fn load_action(&self, action_id: Uuid) -> WorkflowResult<Option<Action>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .flat_map(|w| w.rules.iter())
            .flat_map(|r| r.actions.iter())
            .find(|a| a.id == action_id)
            .cloned())
    }

    async fn append_log(&self, entry: &ExecutionLog) -> WorkflowResult<()> {
        if self.fail_log_writes.load(Ordering::SeqCst) {
            return Err(WorkflowError::collaborator("execution log", "log store unavailable"));
        }
        self.logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn create_follow_up(&self, follow_up: &FollowUp) -> WorkflowResult<Uuid> {
        self.follow_ups.write().await.push(follow_up.clone());
        Ok(follow_up.id)
    }

    async fn save_record_changes(
        &self,
        record_type: &str,
        record_id: &str,
        changes: &Map<String, Value>,
    ) -> WorkflowResult<()> {
        let mut saved = self.saved_changes.write().await;
        let entry = saved
            .entry((record_type.to_string(), record_id.to_string()))
            .or_default();
        for (name, value) in changes {
            entry.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Business records held in process memory, keyed by record type.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<String, Vec<Record>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: Record) {
        self.records
            .write()
            .await
            .entry(record.record_type().to_string())
            .or_default()
            .push(record);
    }

    pub async fn find(&self, record_type: &str, id: &str) -> Option<Record> {
        self.records
            .read()
            .await
            .get(record_type)?
            .iter()
            .find(|r| r.id() == id)
            .cloned()
    }
}

#[async_trait]
impl RecordWriter for InMemoryRecordStore {
    async fn create_record(&self, record_type: &str, fields: &Map<String, Value>) -> WorkflowResult<String> {
        let id = Uuid::new_v4().to_string();
        self.insert(Record::from_json(record_type, id.clone(), Value::Object(fields.clone())))
            .await;
        Ok(id)
    }

    async fn update_related(
        &self,
        record_type: &str,
        link_field: &str,
        parent_id: &str,
        fields: &Map<String, Value>,
    ) -> WorkflowResult<u64> {
        let mut records = self.records.write().await;
        let mut updated = 0;

        for record in records.get_mut(record_type).into_iter().flatten() {
            if record.text(link_field).as_deref() == Some(parent_id) {
                record.merge_fields(fields);
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn load_records(&self, record_type: &str) -> WorkflowResult<Vec<Record>> {
        Ok(self
            .records
            .read()
            .await
            .get(record_type)
            .cloned()
            .unwrap_or_default())
    }
}
