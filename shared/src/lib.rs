use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event class that can start workflow evaluation for a record.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_trigger_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(alias = "on_create")]
    OnCreate,
    #[serde(alias = "on_update")]
    OnUpdate,
    #[serde(alias = "on_delete")]
    OnDelete,
    #[serde(alias = "scheduled")]
    Scheduled,
    #[serde(alias = "manual")]
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnCreate => "on_create",
            Self::OnUpdate => "on_update",
            Self::OnDelete => "on_delete",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "").as_str() {
            "oncreate" => Ok(Self::OnCreate),
            "onupdate" => Ok(Self::OnUpdate),
            "ondelete" => Ok(Self::OnDelete),
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// How a rule combines its conditions.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_logic_mode", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicMode {
    #[default]
    #[serde(alias = "all", alias = "AND", alias = "and")]
    All,
    #[serde(alias = "any", alias = "OR", alias = "or")]
    Any,
}

/// Outcome recorded for a workflow, rule or action attempt.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "execution_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    Pending,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Pending => "pending",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only automation audit trail.
///
/// Workflow, rule and action ids are weak references: entries outlive the
/// definitions they point at.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub action_id: Option<Uuid>,
    pub record_type: String,
    pub record_id: String,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub details: Option<String>,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(
        workflow_id: Uuid,
        record_type: impl Into<String>,
        record_id: impl Into<String>,
        status: ExecutionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            rule_id: None,
            action_id: None,
            record_type: record_type.into(),
            record_id: record_id.into(),
            status,
            error_message: None,
            details: None,
            duration_ms: 0,
            executed_at: Utc::now(),
        }
    }

    pub fn for_rule(mut self, rule_id: Uuid) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    pub fn for_action(mut self, rule_id: Uuid, action_id: Uuid) -> Self {
        self.rule_id = Some(rule_id);
        self.action_id = Some(action_id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_workflow_entry(&self) -> bool {
        self.rule_id.is_none() && self.action_id.is_none()
    }

    pub fn is_rule_entry(&self) -> bool {
        self.rule_id.is_some() && self.action_id.is_none()
    }

    pub fn is_action_entry(&self) -> bool {
        self.action_id.is_some()
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "follow_up_kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowUpKind {
    Task,
    Activity,
}

/// Lightweight task or activity created by automation and linked back to
/// the record that triggered it.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: Uuid,
    pub kind: FollowUpKind,
    pub subject: String,
    pub description: Option<String>,
    pub follow_up_type: Option<String>,
    pub priority: String,
    pub due_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<String>,
    /// Foreign reference column, e.g. `lead_id`
    pub link_field: String,
    pub linked_record_id: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A "run this action against this snapshot at this time" message.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedAction {
    pub id: Uuid,
    pub action_id: Uuid,
    pub rule_id: Uuid,
    pub workflow_id: Uuid,
    pub record_type: String,
    pub record_id: String,
    pub record_snapshot: serde_json::Value,
    pub acting_user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
