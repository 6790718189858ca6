use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use automation_shared::{ExecutionLog, FollowUp, LogicMode, TriggerType};
use crate::error::WorkflowResult;
use crate::workflows::actions::StoredAction;
use crate::workflows::conditions::parse_conditions;
use crate::workflows::{Action, Record, Rule, Workflow};
use super::{RecordWriter, WorkflowStore};

#[derive(Debug, sqlx::FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    record_type: String,
    trigger_type: TriggerType,
    schedule: Option<String>,
    trigger_fields: Vec<String>,
    is_active: bool,
    execution_order: i32,
    stop_on_match: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    workflow_id: Uuid,
    name: String,
    execution_order: i32,
    conditions: Value,
    logic: LogicMode,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    fields: Value,
}

const WORKFLOW_COLUMNS: &str = "id, name, record_type, trigger_type, schedule, trigger_fields, \
                                is_active, execution_order, stop_on_match";

const ACTION_COLUMNS: &str = "id, rule_id, name, kind, execution_order, config, delay_minutes, is_active";

/// Workflow definitions and automation side tables in PostgreSQL.
#[derive(Clone)]
pub struct PgWorkflowStore {
    db_pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Attach rules and actions to the given workflow rows.
    async fn assemble(&self, rows: Vec<WorkflowRow>) -> WorkflowResult<Vec<Workflow>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let workflow_ids: Vec<Uuid> = rows.iter().map(|w| w.id).collect();
        let rule_rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, workflow_id, name, execution_order, conditions, logic, is_active
            FROM workflow_rules
            WHERE workflow_id = ANY($1)
            ORDER BY execution_order ASC
            "#,
        )
        .bind(&workflow_ids)
        .fetch_all(&self.db_pool)
        .await?;

        let rule_ids: Vec<Uuid> = rule_rows.iter().map(|r| r.id).collect();
        let action_rows = sqlx::query_as::<_, StoredAction>(&format!(
            "SELECT {} FROM workflow_actions WHERE rule_id = ANY($1) ORDER BY execution_order ASC",
            ACTION_COLUMNS
        ))
        .bind(&rule_ids)
        .fetch_all(&self.db_pool)
        .await?;

        let mut actions_by_rule: HashMap<Uuid, Vec<Action>> = HashMap::new();
        for row in action_rows {
            actions_by_rule.entry(row.rule_id).or_default().push(Action::from(row));
        }

        let mut rules_by_workflow: HashMap<Uuid, Vec<Rule>> = HashMap::new();
        for row in rule_rows {
            let rule = Rule {
                id: row.id,
                workflow_id: row.workflow_id,
                name: row.name,
                execution_order: row.execution_order,
                conditions: parse_conditions(&row.conditions),
                logic: row.logic,
                is_active: row.is_active,
                actions: actions_by_rule.remove(&row.id).unwrap_or_default(),
            };
            rules_by_workflow.entry(row.workflow_id).or_default().push(rule);
        }

        Ok(rows
            .into_iter()
            .map(|row| Workflow {
                rules: rules_by_workflow.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                record_type: row.record_type,
                trigger_type: row.trigger_type,
                schedule: row.schedule,
                trigger_fields: row.trigger_fields,
                is_active: row.is_active,
                execution_order: row.execution_order,
                stop_on_match: row.stop_on_match,
            })
            .collect())
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn load_workflows(&self, record_type: &str, trigger: TriggerType) -> WorkflowResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows \
             WHERE record_type = $1 AND trigger_type = $2 AND is_active = true \
             ORDER BY execution_order ASC, created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(record_type)
        .bind(trigger)
        .fetch_all(&self.db_pool)
        .await?;

        debug!("Loaded {} {} workflows for {}", rows.len(), trigger, record_type);
        self.assemble(rows).await
    }

    async fn scheduled_workflows(&self) -> WorkflowResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows \
             WHERE trigger_type = $1 AND is_active = true AND schedule IS NOT NULL \
             ORDER BY execution_order ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(TriggerType::Scheduled)
        .fetch_all(&self.db_pool)
        .await?;

        self.assemble(rows).await
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> WorkflowResult<Option<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(self.assemble(rows).await?.pop())
    }

    async fn load_action(&self, action_id: Uuid) -> WorkflowResult<Option<Action>> {
        let row = sqlx::query_as::<_, StoredAction>(&format!(
            "SELECT {} FROM workflow_actions WHERE id = $1",
            ACTION_COLUMNS
        ))
        .bind(action_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(Action::from))
    }

    async fn append_log(&self, entry: &ExecutionLog) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_execution_logs
                (id, workflow_id, rule_id, action_id, record_type, record_id, status,
                 error_message, details, duration_ms, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.workflow_id)
        .bind(entry.rule_id)
        .bind(entry.action_id)
        .bind(&entry.record_type)
        .bind(&entry.record_id)
        .bind(entry.status)
        .bind(&entry.error_message)
        .bind(&entry.details)
        .bind(entry.duration_ms)
        .bind(entry.executed_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn create_follow_up(&self, follow_up: &FollowUp) -> WorkflowResult<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO follow_ups
                (id, kind, subject, description, follow_up_type, priority, due_at,
                 assigned_to, link_field, linked_record_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(follow_up.id)
        .bind(follow_up.kind)
        .bind(&follow_up.subject)
        .bind(&follow_up.description)
        .bind(&follow_up.follow_up_type)
        .bind(&follow_up.priority)
        .bind(follow_up.due_at)
        .bind(&follow_up.assigned_to)
        .bind(&follow_up.link_field)
        .bind(&follow_up.linked_record_id)
        .bind(&follow_up.created_by)
        .bind(follow_up.created_at)
        .execute(&self.db_pool)
        .await?;

        Ok(follow_up.id)
    }

    async fn save_record_changes(
        &self,
        record_type: &str,
        record_id: &str,
        changes: &Map<String, Value>,
    ) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            UPDATE business_records
            SET fields = fields || $3, updated_at = NOW()
            WHERE record_type = $1 AND id = $2
            "#,
        )
        .bind(record_type)
        .bind(record_id)
        .bind(Value::Object(changes.clone()))
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}

/// Generic JSONB-backed business records.
#[derive(Clone)]
pub struct PgRecordStore {
    db_pool: PgPool,
}

impl PgRecordStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RecordWriter for PgRecordStore {
    async fn create_record(&self, record_type: &str, fields: &Map<String, Value>) -> WorkflowResult<String> {
        let id = Uuid::new_v4().to_string();
        let now: DateTime<Utc> = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO business_records (record_type, id, fields, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(record_type)
        .bind(&id)
        .bind(Value::Object(fields.clone()))
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn update_related(
        &self,
        record_type: &str,
        link_field: &str,
        parent_id: &str,
        fields: &Map<String, Value>,
    ) -> WorkflowResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE business_records
            SET fields = fields || $4, updated_at = NOW()
            WHERE record_type = $1 AND fields ->> $2 = $3
            "#,
        )
        .bind(record_type)
        .bind(link_field)
        .bind(parent_id)
        .bind(Value::Object(fields.clone()))
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn load_records(&self, record_type: &str) -> WorkflowResult<Vec<Record>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT id, fields FROM business_records WHERE record_type = $1 ORDER BY created_at ASC",
        )
        .bind(record_type)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Record::from_json(record_type, row.id, row.fields))
            .collect())
    }
}
