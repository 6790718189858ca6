// Workflow Executor - Runs a single action against a record

use chrono::{Duration, Utc};
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use automation_shared::{DelayedAction, FollowUp, FollowUpKind};
use super::actions::{
    Action, ActionDefinition, ActionKind, ActionResult, AssignOwnerConfig, CreateRecordConfig,
    FollowUpConfig, NotificationConfig, SendEmailConfig, SendWebhookConfig, UpdateFieldConfig,
    UpdateRelatedConfig,
};
use super::links::RecordLinkRegistry;
use super::record::Record;
use super::templating::{parse_due_date, resolve_json, resolve_placeholders};
use super::triggers::TriggerContext;
use crate::error::{WorkflowError, WorkflowResult};
use crate::services::{
    ChannelMask, DelayedActionScheduler, EmailSender, Notification, NotificationSender,
    UserDirectory, WebhookDispatcher, WebhookRequest,
};
use crate::store::{RecordWriter, WorkflowStore};

/// Fields an `AssignOwner` action may write, most specific first.
const ASSIGNEE_FIELDS: &[&str] = &[
    "AssignedToUserId",
    "AssignedTo",
    "AssigneeId",
    "Assignee",
    "assigned_to",
];
const OWNER_FIELDS: &[&str] = &["OwnerId", "Owner", "owner_id"];

/// Context for executing an action
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub workflow_id: Uuid,
    pub rule_id: Uuid,
    pub acting_user_id: Option<String>,
    pub tenant_id: Option<String>,
}

impl ExecutionContext {
    pub fn from_trigger(workflow_id: Uuid, rule_id: Uuid, trigger: &TriggerContext) -> Self {
        Self {
            workflow_id,
            rule_id,
            acting_user_id: trigger.acting_user_id.clone(),
            tenant_id: trigger.tenant_id.clone(),
        }
    }
}

/// Everything outside the engine that actions reach for.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn WorkflowStore>,
    pub records: Arc<dyn RecordWriter>,
    pub email: Arc<dyn EmailSender>,
    pub notifications: Arc<dyn NotificationSender>,
    pub webhooks: Arc<dyn WebhookDispatcher>,
    pub users: Arc<dyn UserDirectory>,
    /// Without a scheduler, delayed actions run immediately
    pub scheduler: Option<Arc<dyn DelayedActionScheduler>>,
    pub links: Arc<RecordLinkRegistry>,
}

pub struct ActionExecutor {
    collaborators: Collaborators,
}

impl ActionExecutor {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Execute an action, deferring it to the scheduler when it carries a delay.
    pub async fn execute(&self, action: &Action, record: &mut Record, context: &ExecutionContext) -> ActionResult {
        if action.delay_minutes > 0 {
            match &self.collaborators.scheduler {
                Some(scheduler) => {
                    let start = Instant::now();
                    return self
                        .schedule(action, record, context, scheduler.as_ref())
                        .await
                        .with_duration(start.elapsed().as_millis() as i64);
                }
                None => debug!(
                    "No scheduler configured; running delayed action '{}' immediately",
                    action.name
                ),
            }
        }

        self.execute_now(action, record, context).await
    }

    /// Execute an action right away, ignoring any delay. Never panics and
    /// never returns an error: every failure becomes a failed result.
    pub async fn execute_now(&self, action: &Action, record: &mut Record, context: &ExecutionContext) -> ActionResult {
        let start = Instant::now();

        info!("Executing action: {} ({})", action.name, action.kind_name());

        let outcome = AssertUnwindSafe(self.dispatch(action, record, context))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("Action '{}' failed: {}", action.name, e);
                ActionResult::failure(e.to_string())
            }
            Err(_) => {
                error!("Action '{}' panicked", action.name);
                ActionResult::failure(format!("action '{}' panicked during execution", action.name))
            }
        };

        result.with_duration(start.elapsed().as_millis() as i64)
    }

    async fn schedule(
        &self,
        action: &Action,
        record: &Record,
        context: &ExecutionContext,
        scheduler: &dyn DelayedActionScheduler,
    ) -> ActionResult {
        let snapshot = match record.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return ActionResult::failure(e.to_string()),
        };

        let now = Utc::now();
        let delayed = DelayedAction {
            id: Uuid::new_v4(),
            action_id: action.id,
            rule_id: context.rule_id,
            workflow_id: context.workflow_id,
            record_type: record.record_type().to_string(),
            record_id: record.id().to_string(),
            record_snapshot: snapshot,
            acting_user_id: context.acting_user_id.clone(),
            tenant_id: context.tenant_id.clone(),
            run_at: now + Duration::minutes(i64::from(action.delay_minutes)),
            created_at: now,
        };

        match scheduler.schedule_delayed(&delayed).await {
            Ok(()) => {
                info!("Action '{}' scheduled for {}", action.name, delayed.run_at);
                ActionResult::pending(format!("Scheduled for {}", delayed.run_at.to_rfc3339()))
                    .with_output(json!({ "delayed_action_id": delayed.id, "run_at": delayed.run_at }))
            }
            Err(e) => {
                warn!("Failed to schedule action '{}': {}", action.name, e);
                ActionResult::failure(format!("failed to schedule delayed action: {}", e))
            }
        }
    }

    async fn dispatch(
        &self,
        action: &Action,
        record: &mut Record,
        context: &ExecutionContext,
    ) -> WorkflowResult<ActionResult> {
        match &action.definition {
            ActionDefinition::UpdateField(config) => self.update_field(config, record),
            ActionDefinition::SendEmail(config) => self.send_email(config, record).await,
            ActionDefinition::CreateTask(config) => {
                self.create_follow_up(FollowUpKind::Task, config, record, context).await
            }
            ActionDefinition::CreateActivity(config) => {
                self.create_follow_up(FollowUpKind::Activity, config, record, context).await
            }
            ActionDefinition::AssignOwner(config) => self.assign_owner(config, record),
            ActionDefinition::SendWebhook(config) => self.send_webhook(config, record).await,
            ActionDefinition::CreateRecord(config) => self.create_record(config, record).await,
            ActionDefinition::UpdateRelated(config) => self.update_related(config, record).await,
            ActionDefinition::SendNotification(config) => {
                self.send_notification(ActionKind::SendNotification, config, record, context).await
            }
            ActionDefinition::SendSms(config) => {
                self.send_notification(ActionKind::SendSms, config, record, context).await
            }
            ActionDefinition::Invalid { raw_kind, reason, .. } => Err(WorkflowError::configuration(format!(
                "invalid {} action: {}",
                raw_kind, reason
            ))),
        }
    }

    fn update_field(&self, config: &UpdateFieldConfig, record: &mut Record) -> WorkflowResult<ActionResult> {
        let literal = resolve_placeholders(&config.value, record);
        let value = record.set_literal(&config.field, &literal)?;

        Ok(ActionResult::success(format!("Set {} to {}", config.field, literal))
            .with_output(json!({ "field": config.field, "value": value })))
    }

    /// A resolved value containing `@` is used as an address; anything else
    /// is looked up as a user id.
    async fn resolve_email(&self, raw: &str, record: &Record) -> WorkflowResult<String> {
        let resolved = resolve_placeholders(raw, record).trim().to_string();
        if resolved.is_empty() {
            return Err(WorkflowError::resolution(format!(
                "recipient '{}' resolved to an empty value",
                raw
            )));
        }
        if resolved.contains('@') {
            return Ok(resolved);
        }

        let user = self
            .collaborators
            .users
            .find_user(&resolved)
            .await?
            .ok_or_else(|| WorkflowError::resolution(format!("no user found for recipient '{}'", resolved)))?;

        user.email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| WorkflowError::resolution(format!("user '{}' has no email address", user.id)))
    }

    async fn send_email(&self, config: &SendEmailConfig, record: &Record) -> WorkflowResult<ActionResult> {
        let to = self.resolve_email(&config.to, record).await?;
        let subject = resolve_placeholders(&config.subject, record);
        let body = resolve_placeholders(&config.body, record);

        self.collaborators
            .email
            .send(&to, &subject, &body, config.is_html)
            .await?;

        Ok(ActionResult::success(format!("Email sent to {}", to)).with_output(json!({ "to": to, "subject": subject })))
    }

    async fn create_follow_up(
        &self,
        kind: FollowUpKind,
        config: &FollowUpConfig,
        record: &Record,
        context: &ExecutionContext,
    ) -> WorkflowResult<ActionResult> {
        let link_field = self
            .collaborators
            .links
            .link_field(record.record_type())
            .ok_or_else(|| {
                WorkflowError::resolution(format!(
                    "no follow-up link registered for record type {}",
                    record.record_type()
                ))
            })?;

        let due_at = config
            .due_date
            .as_deref()
            .map(|expr| resolve_placeholders(expr, record))
            .and_then(|expr| parse_due_date(&expr, Utc::now()));

        let assigned_to = config
            .assigned_to
            .as_deref()
            .map(|raw| resolve_placeholders(raw, record).trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| context.acting_user_id.clone());

        let follow_up = FollowUp {
            id: Uuid::new_v4(),
            kind,
            subject: resolve_placeholders(&config.subject, record),
            description: config.description.as_deref().map(|d| resolve_placeholders(d, record)),
            follow_up_type: config.follow_up_type.clone(),
            priority: config.priority.clone(),
            due_at,
            assigned_to,
            link_field: link_field.to_string(),
            linked_record_id: record.id().to_string(),
            created_by: context.acting_user_id.clone(),
            created_at: Utc::now(),
        };

        let id = self.collaborators.store.create_follow_up(&follow_up).await?;

        Ok(ActionResult::success(format!("Created {:?} '{}'", kind, follow_up.subject))
            .with_output(json!({ "follow_up_id": id, "due_at": due_at, "assigned_to": follow_up.assigned_to })))
    }

    fn assign_owner(&self, config: &AssignOwnerConfig, record: &mut Record) -> WorkflowResult<ActionResult> {
        let owner = resolve_placeholders(&config.owner, record).trim().to_string();
        if owner.is_empty() {
            return Err(WorkflowError::resolution(format!(
                "owner '{}' resolved to an empty value",
                config.owner
            )));
        }

        let field = ASSIGNEE_FIELDS
            .iter()
            .chain(OWNER_FIELDS)
            .find(|name| record.has_field(name))
            .ok_or_else(|| {
                WorkflowError::resolution(format!(
                    "record type {} has no assignee or owner field",
                    record.record_type()
                ))
            })?;

        record.set_literal(field, &owner)?;

        Ok(ActionResult::success(format!("Assigned to {}", owner)).with_output(json!({ "field": field, "owner": owner })))
    }

    async fn send_webhook(&self, config: &SendWebhookConfig, record: &Record) -> WorkflowResult<ActionResult> {
        let url = resolve_placeholders(&config.url, record);
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(WorkflowError::configuration(format!("invalid webhook url: {}", url)));
        }

        let payload = match &config.payload {
            Some(template) => resolve_json(template, record),
            None => json!({
                "record_type": record.record_type(),
                "record_id": record.id(),
                "fields": record.fields(),
            }),
        };

        let request = WebhookRequest {
            url: url.clone(),
            method: config.method.clone(),
            payload,
            headers: config
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), resolve_placeholders(value, record)))
                .collect(),
        };

        let delivery = self.collaborators.webhooks.deliver(&request).await?;

        Ok(ActionResult::success(format!("Delivered to {} (status {})", url, delivery.status_code))
            .with_output(json!({ "status_code": delivery.status_code, "attempts": delivery.attempts })))
    }

    async fn create_record(&self, config: &CreateRecordConfig, record: &Record) -> WorkflowResult<ActionResult> {
        let fields = match resolve_json(&Value::Object(config.fields.clone()), record) {
            Value::Object(fields) => fields,
            _ => config.fields.clone(),
        };

        let id = self
            .collaborators
            .records
            .create_record(&config.record_type, &fields)
            .await?;

        Ok(ActionResult::success(format!("Created {} {}", config.record_type, id))
            .with_output(json!({ "record_type": config.record_type, "record_id": id })))
    }

    async fn update_related(&self, config: &UpdateRelatedConfig, record: &Record) -> WorkflowResult<ActionResult> {
        let link_field = match &config.link_field {
            Some(field) => field.as_str(),
            None => self
                .collaborators
                .links
                .link_field(record.record_type())
                .ok_or_else(|| {
                    WorkflowError::resolution(format!(
                        "no link registered from {} to {}",
                        config.related_type,
                        record.record_type()
                    ))
                })?,
        };

        let fields = match resolve_json(&Value::Object(config.fields.clone()), record) {
            Value::Object(fields) => fields,
            _ => config.fields.clone(),
        };

        let updated = self
            .collaborators
            .records
            .update_related(&config.related_type, link_field, record.id(), &fields)
            .await?;

        Ok(ActionResult::success(format!("Updated {} {} records", updated, config.related_type))
            .with_output(json!({ "updated": updated })))
    }

    async fn send_notification(
        &self,
        kind: ActionKind,
        config: &NotificationConfig,
        record: &Record,
        context: &ExecutionContext,
    ) -> WorkflowResult<ActionResult> {
        let user_id = config
            .recipient
            .as_deref()
            .map(|raw| resolve_placeholders(raw, record).trim().to_string())
            .filter(|id| !id.is_empty())
            .or_else(|| context.acting_user_id.clone())
            .ok_or_else(|| WorkflowError::resolution("notification has no recipient and no acting user"))?;

        let channels = match kind {
            ActionKind::SendSms => ChannelMask::SMS,
            _ => config
                .channels
                .as_deref()
                .map(ChannelMask::parse)
                .unwrap_or(ChannelMask::IN_APP),
        };

        let notification = Notification {
            user_id: user_id.clone(),
            title: config
                .title
                .as_deref()
                .map(|t| resolve_placeholders(t, record))
                .unwrap_or_else(|| "Notification".to_string()),
            message: resolve_placeholders(&config.message, record),
            channels,
            entity_type: Some(record.record_type().to_string()),
            entity_id: Some(record.id().to_string()),
        };

        let id = self.collaborators.notifications.send(&notification).await?;

        Ok(ActionResult::success(format!("Notified {} via {}", user_id, channels))
            .with_output(json!({ "notification_id": id })))
    }
}
