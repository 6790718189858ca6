// Unit tests for the action executor

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use automation_shared::{ExecutionStatus, FollowUpKind};
use crate::error::WorkflowError;
use crate::services::{ChannelMask, MockDelayedActionScheduler, MockEmailSender, MockUserDirectory};
use crate::tests::fixtures::*;
use crate::workflows::{Action, ActionExecutor, ActionKind, ExecutionContext, Record};

fn context() -> ExecutionContext {
    ExecutionContext::default()
}

fn acting(user_id: &str) -> ExecutionContext {
    ExecutionContext {
        acting_user_id: Some(user_id.to_string()),
        ..ExecutionContext::default()
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================
// UpdateField / AssignOwner
// ============================================

#[cfg(test)]
mod field_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_field_sets_literal() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(&Action::update_field("Status", "Contacted"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(record.text("Status").as_deref(), Some("Contacted"));
        assert!(record.is_dirty());
    }

    #[tokio::test]
    async fn test_update_field_converts_to_field_type() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(&Action::update_field("Score", "57"), &mut record, &context())
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(record.get("Score"), Some(json!(57)));

        let result = harness
            .executor()
            .execute(&Action::update_field("Score", "lots"), &mut record, &context())
            .await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(record.get("Score"), Some(json!(57)));
    }

    #[tokio::test]
    async fn test_update_field_rejects_missing_and_read_only() {
        let harness = Harness::new();
        let executor = harness.executor();
        let mut record = lead();

        let missing = executor
            .execute(&Action::update_field("Nickname", "Ace"), &mut record, &context())
            .await;
        assert_eq!(missing.status, ExecutionStatus::Failed);
        assert!(missing.message.contains("does not exist"));

        let read_only = executor
            .execute(&Action::update_field("Id", "L-999"), &mut record, &context())
            .await;
        assert_eq!(read_only.status, ExecutionStatus::Failed);
        assert!(read_only.message.contains("read-only"));
        assert_eq!(record.id(), "L-100");
    }

    #[tokio::test]
    async fn test_update_field_resolves_placeholders() {
        let harness = Harness::new();
        let mut record = lead();

        harness
            .executor()
            .execute(&Action::update_field("Status", "Owned by {{OwnerId}}"), &mut record, &context())
            .await;

        assert_eq!(record.text("Status").as_deref(), Some("Owned by U1"));
    }

    #[tokio::test]
    async fn test_assign_owner_prefers_assignee_field() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(&Action::assign_owner("{{OwnerId}}"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(record.text("AssignedToUserId").as_deref(), Some("U1"));
    }

    #[tokio::test]
    async fn test_assign_owner_falls_back_to_owner_field() {
        let harness = Harness::new();
        let mut record = opportunity();

        let result = harness
            .executor()
            .execute(&Action::assign_owner("U9"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(record.text("OwnerId").as_deref(), Some("U9"));
    }

    #[tokio::test]
    async fn test_assign_owner_without_ownership_field_fails() {
        let harness = Harness::new();
        let mut record = Record::from_json("Note", "N-1", json!({ "Body": "hello" }));

        let result = harness
            .executor()
            .execute(&Action::assign_owner("U1"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("no assignee or owner field"));
    }
}

// ============================================
// SendEmail
// ============================================

#[cfg(test)]
mod email_tests {
    use super::*;

    #[tokio::test]
    async fn test_send_email_to_literal_address() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(
                &Action::send_email("{{Email}}", "Welcome {{Name}}", "Lead {{Id}} is {{Status}}"),
                &mut record,
                &context(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let sent = harness.email.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "prospect@example.com");
        assert_eq!(sent[0].body, "Lead L-100 is New");
    }

    #[tokio::test]
    async fn test_send_email_looks_up_user_identifiers() {
        let harness = Harness::new();
        let executor = harness.executor();
        let mut record = lead();

        executor
            .execute(&Action::send_email("U1", "Hi", "Body"), &mut record, &context())
            .await;
        executor
            .execute(&Action::send_email("{{OwnerId}}", "Hi again", "Body"), &mut record, &context())
            .await;

        let sent = harness.email.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|email| email.to == "owner1@example.com"));
    }

    #[tokio::test]
    async fn test_send_email_unresolvable_recipient_fails() {
        let harness = Harness::new();
        let executor = harness.executor();
        let mut record = lead();

        let unknown = executor
            .execute(&Action::send_email("nobody", "Hi", "Body"), &mut record, &context())
            .await;
        assert_eq!(unknown.status, ExecutionStatus::Failed);
        assert!(!unknown.message.is_empty());

        let no_address = executor
            .execute(&Action::send_email("U2", "Hi", "Body"), &mut record, &context())
            .await;
        assert_eq!(no_address.status, ExecutionStatus::Failed);
        assert!(no_address.message.contains("no email address"));

        let empty = executor
            .execute(&Action::send_email("{{AssignedToUserId}}", "Hi", "Body"), &mut record, &context())
            .await;
        assert_eq!(empty.status, ExecutionStatus::Failed);

        assert!(harness.email.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_email_collaborator_failure_is_contained() {
        let harness = Harness::new();
        let mut email = MockEmailSender::new();
        email
            .expect_send()
            .withf(|to, _, _, is_html| to == "prospect@example.com" && !is_html)
            .times(1)
            .returning(|_, _, _, _| Err(WorkflowError::collaborator("email", "relay refused")));

        let mut collaborators = harness.collaborators();
        collaborators.email = Arc::new(email);
        let executor = ActionExecutor::new(collaborators);

        let mut record = lead();
        let result = executor
            .execute(&Action::send_email("{{Email}}", "Hi", "Body"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("relay refused"));
    }

    #[tokio::test]
    async fn test_user_directory_errors_fail_the_action() {
        let harness = Harness::new();
        let mut users = MockUserDirectory::new();
        users
            .expect_find_user()
            .withf(|id| id == "U1")
            .times(1)
            .returning(|_| Err(WorkflowError::collaborator("directory", "timeout")));

        let mut collaborators = harness.collaborators();
        collaborators.users = Arc::new(users);
        let executor = ActionExecutor::new(collaborators);

        let mut record = lead();
        let result = executor
            .execute(&Action::send_email("{{OwnerId}}", "Hi", "Body"), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("timeout"));
    }
}

// ============================================
// CreateTask / CreateActivity
// ============================================

#[cfg(test)]
mod follow_up_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_task_with_relative_due_date() {
        let harness = Harness::new();
        let mut record = lead();
        let before = Utc::now();

        let result = harness
            .executor()
            .execute(
                &Action::create_task("Call {{Name}}", Some("+3d")),
                &mut record,
                &acting("U1"),
            )
            .await;
        let after = Utc::now();

        assert_eq!(result.status, ExecutionStatus::Success);
        let follow_ups = harness.store.follow_ups().await;
        assert_eq!(follow_ups.len(), 1);

        let task = &follow_ups[0];
        assert_eq!(task.kind, FollowUpKind::Task);
        assert_eq!(task.link_field, "lead_id");
        assert_eq!(task.linked_record_id, "L-100");
        assert_eq!(task.assigned_to.as_deref(), Some("U1"));
        assert_eq!(task.priority, "Normal");

        let due = task.due_at.expect("due date");
        assert!(due >= before + Duration::days(3) && due <= after + Duration::days(3));
    }

    #[tokio::test]
    async fn test_unparsable_due_date_means_no_due_date() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(&Action::create_task("Call", Some("whenever")), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let follow_ups = harness.store.follow_ups().await;
        assert!(follow_ups[0].due_at.is_none());
        assert!(follow_ups[0].assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_create_activity_keeps_type() {
        let harness = Harness::new();
        let mut record = opportunity();

        harness
            .executor()
            .execute(&Action::create_activity("Log meeting", "Meeting"), &mut record, &context())
            .await;

        let follow_ups = harness.store.follow_ups().await;
        assert_eq!(follow_ups[0].kind, FollowUpKind::Activity);
        assert_eq!(follow_ups[0].follow_up_type.as_deref(), Some("Meeting"));
        assert_eq!(follow_ups[0].link_field, "opportunity_id");
    }

    #[tokio::test]
    async fn test_follow_up_for_unlinked_record_type_fails() {
        let harness = Harness::new();
        let mut record = Record::from_json("Spaceship", "S-1", json!({}));

        let result = harness
            .executor()
            .execute(&Action::create_task("Refuel", None), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("Spaceship"));
        assert!(harness.store.follow_ups().await.is_empty());
    }
}

// ============================================
// Webhooks, records and notifications
// ============================================

#[cfg(test)]
mod delegation_tests {
    use super::*;
    use crate::services::memory::RecordingWebhookDispatcher;

    #[tokio::test]
    async fn test_webhook_default_payload_is_the_record() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(
                &Action::send_webhook("https://hooks.example.com/leads/{{Id}}", None),
                &mut record,
                &context(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let delivered = harness.webhooks.delivered().await;
        assert_eq!(delivered[0].url, "https://hooks.example.com/leads/L-100");
        assert_eq!(delivered[0].method, "POST");
        assert_eq!(delivered[0].payload["record_type"], json!("Lead"));
        assert_eq!(delivered[0].payload["fields"]["Status"], json!("New"));
    }

    #[tokio::test]
    async fn test_webhook_failures() {
        let mut harness = Harness::new();
        harness.webhooks = RecordingWebhookDispatcher::responding_with(503);
        let executor = harness.executor();
        let mut record = lead();

        let rejected = executor
            .execute(&Action::send_webhook("https://hooks.example.com", None), &mut record, &context())
            .await;
        assert_eq!(rejected.status, ExecutionStatus::Failed);
        assert!(rejected.message.contains("503"));

        let bad_url = executor
            .execute(&Action::send_webhook("ftp://nope", None), &mut record, &context())
            .await;
        assert_eq!(bad_url.status, ExecutionStatus::Failed);
        assert!(bad_url.message.contains("invalid webhook url"));
    }

    #[tokio::test]
    async fn test_create_record_resolves_fields() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(
                &Action::create_record("Contact", fields(json!({ "Email": "{{Email}}", "lead_id": "{{Id}}" }))),
                &mut record,
                &context(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let contacts = crate::store::RecordWriter::load_records(&harness.records, "Contact")
            .await
            .unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].text("Email").as_deref(), Some("prospect@example.com"));
        assert_eq!(contacts[0].text("lead_id").as_deref(), Some("L-100"));
    }

    #[tokio::test]
    async fn test_update_related_touches_linked_records() {
        let harness = Harness::new();
        harness
            .records
            .insert(Record::from_json("Contact", "C-1", json!({ "lead_id": "L-100", "Stage": "Cold" })))
            .await;
        harness
            .records
            .insert(Record::from_json("Contact", "C-2", json!({ "lead_id": "L-200", "Stage": "Cold" })))
            .await;

        let mut record = lead();
        let result = harness
            .executor()
            .execute(
                &Action::update_related("Contact", fields(json!({ "Stage": "{{Status}}" }))),
                &mut record,
                &context(),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output.unwrap()["updated"], json!(1));
        let touched = harness.records.find("Contact", "C-1").await.unwrap();
        let untouched = harness.records.find("Contact", "C-2").await.unwrap();
        assert_eq!(touched.text("Stage").as_deref(), Some("New"));
        assert_eq!(untouched.text("Stage").as_deref(), Some("Cold"));
    }

    #[tokio::test]
    async fn test_notification_defaults_to_acting_user() {
        let harness = Harness::new();
        let executor = harness.executor();
        let mut record = lead();

        let result = executor
            .execute(&Action::send_notification(None, "Heads up", "{{Name}} is hot"), &mut record, &acting("U7"))
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);

        let missing = executor
            .execute(&Action::send_notification(None, "Heads up", "nobody to tell"), &mut record, &context())
            .await;
        assert_eq!(missing.status, ExecutionStatus::Failed);

        let sent = harness.notifications.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "U7");
        assert_eq!(sent[0].channels, ChannelMask::IN_APP);
        assert_eq!(sent[0].entity_type.as_deref(), Some("Lead"));
    }

    #[tokio::test]
    async fn test_sms_uses_sms_channel() {
        let harness = Harness::new();
        let mut record = ticket("Open");

        harness
            .executor()
            .execute(&Action::send_sms(Some("{{AssignedToUserId}}"), "Ticket {{Id}}"), &mut record, &context())
            .await;

        let sent = harness.notifications.sent().await;
        assert_eq!(sent[0].user_id, "U1");
        assert_eq!(sent[0].channels, ChannelMask::SMS);
        assert_eq!(sent[0].message, "Ticket T-7");
    }
}

// ============================================
// Delays and malformed configuration
// ============================================

#[cfg(test)]
mod scheduling_tests {
    use super::*;

    #[tokio::test]
    async fn test_delayed_action_is_scheduled_not_run() {
        let harness = Harness::new().with_queue();
        let mut record = lead();
        let action = Action::update_field("Status", "Stale").with_delay(60);

        let result = harness.executor().execute(&action, &mut record, &acting("U1")).await;

        assert_eq!(result.status, ExecutionStatus::Pending);
        assert!(result.message.starts_with("Scheduled for"));
        assert_eq!(record.text("Status").as_deref(), Some("New"));

        let pending = harness.queue.as_ref().unwrap().pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action_id, action.id);
        assert_eq!(pending[0].acting_user_id.as_deref(), Some("U1"));
        assert!(pending[0].run_at > Utc::now() + Duration::minutes(59));
        assert_eq!(
            Record::from_snapshot(pending[0].record_snapshot.clone()).unwrap().id(),
            "L-100"
        );
    }

    #[tokio::test]
    async fn test_delay_without_scheduler_runs_immediately() {
        let harness = Harness::new();
        let mut record = lead();

        let result = harness
            .executor()
            .execute(&Action::update_field("Status", "Stale").with_delay(60), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(record.text("Status").as_deref(), Some("Stale"));
    }

    #[tokio::test]
    async fn test_scheduler_failure_fails_the_action() {
        let harness = Harness::new();
        let mut scheduler = MockDelayedActionScheduler::new();
        scheduler
            .expect_schedule_delayed()
            .times(1)
            .returning(|_| Err(WorkflowError::collaborator("queue", "full")));

        let mut collaborators = harness.collaborators();
        collaborators.scheduler = Some(Arc::new(scheduler));
        let executor = ActionExecutor::new(collaborators);

        let mut record = lead();
        let result = executor
            .execute(&Action::create_task("Later", None).with_delay(5), &mut record, &context())
            .await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("full"));
    }

    #[tokio::test]
    async fn test_malformed_configuration_fails_gracefully() {
        let harness = Harness::new();
        let mut record = lead();
        let action = Action::from_config("Broken", ActionKind::SendWebhook, json!({ "headers": 7 }));

        let result = harness.executor().execute(&action, &mut record, &context()).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("invalid SendWebhook action"));
        assert!(harness.webhooks.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stored_kind_reports_its_own_name() {
        let harness = Harness::new();
        let mut record = lead();
        let action: Action = serde_json::from_value(json!({
            "name": "Beam me up",
            "kind": "Teleport",
            "config": { "destination": "bridge" }
        }))
        .unwrap();

        let result = harness.executor().execute(&action, &mut record, &context()).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.message.contains("invalid Teleport action"));
        assert_eq!(serde_json::to_value(&action).unwrap()["kind"], json!("Teleport"));
    }
}
