// Workflow Actions - Closed catalog of effects a matched rule can run

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use automation_shared::ExecutionStatus;
use super::record::value_text;

/// Types of actions that workflows can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    UpdateField,
    SendEmail,
    CreateTask,
    CreateActivity,
    AssignOwner,
    SendWebhook,
    CreateRecord,
    UpdateRelated,
    SendNotification,
    SendSms,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateField => "UpdateField",
            Self::SendEmail => "SendEmail",
            Self::CreateTask => "CreateTask",
            Self::CreateActivity => "CreateActivity",
            Self::AssignOwner => "AssignOwner",
            Self::SendWebhook => "SendWebhook",
            Self::CreateRecord => "CreateRecord",
            Self::UpdateRelated => "UpdateRelated",
            Self::SendNotification => "SendNotification",
            Self::SendSms => "SendSms",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', "").to_ascii_lowercase();
        [
            Self::UpdateField,
            Self::SendEmail,
            Self::CreateTask,
            Self::CreateActivity,
            Self::AssignOwner,
            Self::SendWebhook,
            Self::CreateRecord,
            Self::UpdateRelated,
            Self::SendNotification,
            Self::SendSms,
        ]
        .into_iter()
        .find(|kind| kind.as_str().to_ascii_lowercase() == normalized)
        .ok_or_else(|| format!("unknown action kind: {}", s))
    }
}

/// Accepts any scalar JSON value as its textual form.
fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_text(&value).unwrap_or_default())
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_priority() -> String {
    "Normal".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFieldConfig {
    pub field: String,
    #[serde(deserialize_with = "text")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailConfig {
    /// Email address, user id, or a `{{Field}}` placeholder resolving to either
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub is_html: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpConfig {
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type", alias = "task_type", alias = "activity_type")]
    pub follow_up_type: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Literal timestamp or `+<n>h|d|w|m`
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignOwnerConfig {
    #[serde(alias = "owner_id", alias = "user_id")]
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendWebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Defaults to the record itself when absent
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRecordConfig {
    pub record_type: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRelatedConfig {
    pub related_type: String,
    /// Field on the related records pointing back at the trigger record
    #[serde(default)]
    pub link_field: Option<String>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// User id or placeholder; the acting user when absent
    #[serde(default, alias = "user_id")]
    pub recipient: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    /// Comma-separated channel names, e.g. "InApp,Email"
    #[serde(default)]
    pub channels: Option<String>,
}

/// Strongly-typed configuration for one action, parsed once when the action
/// is loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDefinition {
    UpdateField(UpdateFieldConfig),
    SendEmail(SendEmailConfig),
    CreateTask(FollowUpConfig),
    CreateActivity(FollowUpConfig),
    AssignOwner(AssignOwnerConfig),
    SendWebhook(SendWebhookConfig),
    CreateRecord(CreateRecordConfig),
    UpdateRelated(UpdateRelatedConfig),
    SendNotification(NotificationConfig),
    SendSms(NotificationConfig),
    /// Stored action that failed to parse; executes as a failure. `kind` is
    /// `None` when the stored tag names no known kind; `raw_kind` keeps the tag.
    Invalid {
        kind: Option<ActionKind>,
        raw_kind: String,
        reason: String,
        raw: Value,
    },
}

fn typed<T: DeserializeOwned>(config: &Value) -> Result<T, String> {
    serde_json::from_value(config.clone()).map_err(|e| e.to_string())
}

fn require(value: &str, name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("'{}' cannot be empty", name))
    } else {
        Ok(())
    }
}

impl ActionDefinition {
    pub fn parse(kind: ActionKind, config: &Value) -> Self {
        let config = match config {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(inner) => inner,
                Err(e) => {
                    return Self::Invalid {
                        kind: Some(kind),
                        raw_kind: kind.as_str().to_string(),
                        reason: format!("configuration is not valid JSON: {}", e),
                        raw: config.clone(),
                    };
                }
            },
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };

        let parsed = Self::parse_typed(kind, &config).and_then(|definition| {
            definition.validate()?;
            Ok(definition)
        });

        parsed.unwrap_or_else(|reason| Self::Invalid {
            kind: Some(kind),
            raw_kind: kind.as_str().to_string(),
            reason,
            raw: config,
        })
    }

    fn parse_typed(kind: ActionKind, config: &Value) -> Result<Self, String> {
        Ok(match kind {
            ActionKind::UpdateField => Self::UpdateField(typed(config)?),
            ActionKind::SendEmail => Self::SendEmail(typed(config)?),
            ActionKind::CreateTask => Self::CreateTask(typed(config)?),
            ActionKind::CreateActivity => Self::CreateActivity(typed(config)?),
            ActionKind::AssignOwner => Self::AssignOwner(typed(config)?),
            ActionKind::SendWebhook => Self::SendWebhook(typed(config)?),
            ActionKind::CreateRecord => Self::CreateRecord(typed(config)?),
            ActionKind::UpdateRelated => Self::UpdateRelated(typed(config)?),
            ActionKind::SendNotification => Self::SendNotification(typed(config)?),
            ActionKind::SendSms => Self::SendSms(typed(config)?),
        })
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::UpdateField(c) => require(&c.field, "field"),
            Self::SendEmail(c) => require(&c.to, "to"),
            Self::CreateTask(c) | Self::CreateActivity(c) => require(&c.subject, "subject"),
            Self::AssignOwner(c) => require(&c.owner, "owner"),
            Self::SendWebhook(c) => require(&c.url, "url"),
            Self::CreateRecord(c) => require(&c.record_type, "record_type"),
            Self::UpdateRelated(c) => {
                require(&c.related_type, "related_type")?;
                if c.fields.is_empty() {
                    return Err("'fields' cannot be empty".to_string());
                }
                Ok(())
            }
            Self::SendNotification(c) | Self::SendSms(c) => require(&c.message, "message"),
            Self::Invalid { .. } => Ok(()),
        }
    }

    /// `None` only for stored tags that name no known kind.
    pub fn kind(&self) -> Option<ActionKind> {
        Some(match self {
            Self::UpdateField(_) => ActionKind::UpdateField,
            Self::SendEmail(_) => ActionKind::SendEmail,
            Self::CreateTask(_) => ActionKind::CreateTask,
            Self::CreateActivity(_) => ActionKind::CreateActivity,
            Self::AssignOwner(_) => ActionKind::AssignOwner,
            Self::SendWebhook(_) => ActionKind::SendWebhook,
            Self::CreateRecord(_) => ActionKind::CreateRecord,
            Self::UpdateRelated(_) => ActionKind::UpdateRelated,
            Self::SendNotification(_) => ActionKind::SendNotification,
            Self::SendSms(_) => ActionKind::SendSms,
            Self::Invalid { kind, .. } => return *kind,
        })
    }

    /// Kind tag as stored, including tags this build does not know.
    pub fn kind_name(&self) -> &str {
        match self {
            Self::Invalid { raw_kind, .. } => raw_kind,
            other => other.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// Configuration document as it is stored.
    pub fn to_config(&self) -> Value {
        let value = match self {
            Self::UpdateField(c) => serde_json::to_value(c),
            Self::SendEmail(c) => serde_json::to_value(c),
            Self::CreateTask(c) | Self::CreateActivity(c) => serde_json::to_value(c),
            Self::AssignOwner(c) => serde_json::to_value(c),
            Self::SendWebhook(c) => serde_json::to_value(c),
            Self::CreateRecord(c) => serde_json::to_value(c),
            Self::UpdateRelated(c) => serde_json::to_value(c),
            Self::SendNotification(c) | Self::SendSms(c) => serde_json::to_value(c),
            Self::Invalid { raw, .. } => Ok(raw.clone()),
        };
        value.unwrap_or(Value::Null)
    }
}

/// Storage shape of an action: kind tag plus free-form configuration.
#[cfg_attr(test, derive(PartialEq))]
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredAction {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub rule_id: Uuid,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub delay_minutes: i32,
    #[serde(default = "crate::workflows::default_true")]
    pub is_active: bool,
}

/// An action to be executed when its rule matches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredAction", into = "StoredAction")]
pub struct Action {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub name: String,
    pub execution_order: i32,
    pub definition: ActionDefinition,
    /// Minutes to wait between the rule matching and the effect landing
    pub delay_minutes: i32,
    pub is_active: bool,
}

impl From<StoredAction> for Action {
    fn from(row: StoredAction) -> Self {
        let definition = match row.kind.parse::<ActionKind>() {
            Ok(kind) => ActionDefinition::parse(kind, &row.config),
            // Unknown kinds cannot execute; keep the row so the failure is logged.
            Err(reason) => ActionDefinition::Invalid {
                kind: None,
                raw_kind: row.kind.clone(),
                reason,
                raw: row.config.clone(),
            },
        };

        Self {
            id: row.id,
            rule_id: row.rule_id,
            name: row.name,
            execution_order: row.execution_order,
            definition,
            delay_minutes: row.delay_minutes,
            is_active: row.is_active,
        }
    }
}

impl From<Action> for StoredAction {
    fn from(action: Action) -> Self {
        Self {
            id: action.id,
            rule_id: action.rule_id,
            name: action.name,
            kind: action.definition.kind_name().to_string(),
            execution_order: action.execution_order,
            config: action.definition.to_config(),
            delay_minutes: action.delay_minutes,
            is_active: action.is_active,
        }
    }
}

impl Action {
    pub fn new(name: &str, definition: ActionDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: Uuid::nil(),
            name: name.to_string(),
            execution_order: 0,
            definition,
            delay_minutes: 0,
            is_active: true,
        }
    }

    /// Build from a kind and a raw configuration document.
    pub fn from_config(name: &str, kind: ActionKind, config: Value) -> Self {
        Self::new(name, ActionDefinition::parse(kind, &config))
    }

    pub fn kind(&self) -> Option<ActionKind> {
        self.definition.kind()
    }

    pub fn kind_name(&self) -> &str {
        self.definition.kind_name()
    }

    pub fn with_delay(mut self, minutes: i32) -> Self {
        self.delay_minutes = minutes;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.execution_order = order;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn update_field(field: &str, value: &str) -> Self {
        Self::new(
            &format!("Set {}", field),
            ActionDefinition::UpdateField(UpdateFieldConfig {
                field: field.to_string(),
                value: value.to_string(),
            }),
        )
    }

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            "Send Email",
            ActionDefinition::SendEmail(SendEmailConfig {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                is_html: false,
            }),
        )
    }

    pub fn create_task(subject: &str, due_date: Option<&str>) -> Self {
        Self::new(
            "Create Task",
            ActionDefinition::CreateTask(FollowUpConfig {
                subject: subject.to_string(),
                description: None,
                follow_up_type: None,
                priority: default_priority(),
                due_date: due_date.map(str::to_string),
                assigned_to: None,
            }),
        )
    }

    pub fn create_activity(subject: &str, activity_type: &str) -> Self {
        Self::new(
            "Create Activity",
            ActionDefinition::CreateActivity(FollowUpConfig {
                subject: subject.to_string(),
                description: None,
                follow_up_type: Some(activity_type.to_string()),
                priority: default_priority(),
                due_date: None,
                assigned_to: None,
            }),
        )
    }

    pub fn assign_owner(owner: &str) -> Self {
        Self::new(
            "Assign Owner",
            ActionDefinition::AssignOwner(AssignOwnerConfig {
                owner: owner.to_string(),
            }),
        )
    }

    pub fn send_webhook(url: &str, payload: Option<Value>) -> Self {
        Self::new(
            "Send Webhook",
            ActionDefinition::SendWebhook(SendWebhookConfig {
                url: url.to_string(),
                method: default_method(),
                payload,
                headers: BTreeMap::new(),
            }),
        )
    }

    pub fn create_record(record_type: &str, fields: Map<String, Value>) -> Self {
        Self::new(
            &format!("Create {}", record_type),
            ActionDefinition::CreateRecord(CreateRecordConfig {
                record_type: record_type.to_string(),
                fields,
            }),
        )
    }

    pub fn update_related(related_type: &str, fields: Map<String, Value>) -> Self {
        Self::new(
            &format!("Update related {}", related_type),
            ActionDefinition::UpdateRelated(UpdateRelatedConfig {
                related_type: related_type.to_string(),
                link_field: None,
                fields,
            }),
        )
    }

    pub fn send_notification(recipient: Option<&str>, title: &str, message: &str) -> Self {
        Self::new(
            "Send Notification",
            ActionDefinition::SendNotification(NotificationConfig {
                recipient: recipient.map(str::to_string),
                title: Some(title.to_string()),
                message: message.to_string(),
                channels: None,
            }),
        )
    }

    pub fn send_sms(recipient: Option<&str>, message: &str) -> Self {
        Self::new(
            "Send SMS",
            ActionDefinition::SendSms(NotificationConfig {
                recipient: recipient.map(str::to_string),
                title: None,
                message: message.to_string(),
                channels: None,
            }),
        )
    }
}

/// Result of executing an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ExecutionStatus,
    pub message: String,
    pub output: Option<Value>,
    pub duration_ms: i64,
}

impl ActionResult {
    fn with_status(status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            output: None,
            duration_ms: 0,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(ExecutionStatus::Success, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_status(ExecutionStatus::Failed, message)
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self::with_status(ExecutionStatus::Pending, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::with_status(ExecutionStatus::Skipped, message)
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Success or Pending: nothing went wrong.
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success | ExecutionStatus::Pending)
    }

    pub fn is_failure(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }
}
