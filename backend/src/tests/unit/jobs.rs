// Unit tests for the delayed-action and scheduled-workflow jobs

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use automation_shared::{DelayedAction, TriggerType};
use crate::jobs::{DelayedActionJob, DelayedActionRunResult, ScheduledRunResult, ScheduledWorkflowJob};
use crate::services::memory::InMemoryDelayedQueue;
use crate::services::{DelayedActionScheduler, DelayedActionSource};
use crate::tests::fixtures::*;
use crate::workflows::{Action, Condition, Record, Rule, Workflow};

fn due_action(workflow: &Workflow, record: &Record, minutes_ago: i64) -> DelayedAction {
    let rule = &workflow.rules[0];
    let now = Utc::now();
    DelayedAction {
        id: Uuid::new_v4(),
        action_id: rule.actions[0].id,
        rule_id: rule.id,
        workflow_id: workflow.id,
        record_type: record.record_type().to_string(),
        record_id: record.id().to_string(),
        record_snapshot: record.snapshot().unwrap(),
        acting_user_id: Some("U1".to_string()),
        tenant_id: None,
        run_at: now - Duration::minutes(minutes_ago),
        created_at: now - Duration::minutes(minutes_ago + 30),
    }
}

fn scheduled_job(harness: &Harness, workflow: &Workflow) -> ScheduledWorkflowJob {
    ScheduledWorkflowJob::new(
        Arc::new(harness.engine()),
        Arc::new(harness.store.clone()),
        Arc::new(harness.records.clone()),
        workflow.id,
    )
}

#[cfg(test)]
mod delayed_action_tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_only_due_actions() {
        let harness = Harness::new().with_queue();
        let queue = harness.queue.clone().unwrap();
        let workflow = Workflow::new("Nurture", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::update_field("Status", "Nurtured").with_delay(30)),
        );
        harness.store.add_workflow(workflow.clone()).await;

        let record = lead();
        queue.schedule_delayed(&due_action(&workflow, &record, 5)).await.unwrap();
        queue.schedule_delayed(&due_action(&workflow, &record, -60)).await.unwrap();

        let job = DelayedActionJob::new(Arc::new(harness.engine()), Arc::new(queue.clone()), 50);
        let result = job.run().await.unwrap();

        assert_eq!(
            result,
            DelayedActionRunResult {
                claimed: 1,
                succeeded: 1,
                failed: 0,
                skipped: 0,
            }
        );
        assert_eq!(queue.pending().await.len(), 1);

        let saved = harness.store.saved_changes("Lead", "L-100").await.unwrap();
        assert_eq!(saved.get("Status"), Some(&json!("Nurtured")));
    }

    #[tokio::test]
    async fn test_counts_failures_and_skips() {
        let harness = Harness::new().with_queue();
        let queue = harness.queue.clone().unwrap();
        let failing = Workflow::new("Mail", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::send_email("nobody", "Hi", "Body").with_delay(10)),
        );
        let removed = Workflow::new("Gone", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::update_field("Status", "Gone").with_delay(10)),
        );
        harness.store.add_workflow(failing.clone()).await;

        let record = lead();
        queue.schedule_delayed(&due_action(&failing, &record, 2)).await.unwrap();
        queue.schedule_delayed(&due_action(&removed, &record, 1)).await.unwrap();

        let job = DelayedActionJob::new(Arc::new(harness.engine()), Arc::new(queue.clone()), 50);
        let result = job.run().await.unwrap();

        assert_eq!(result.claimed, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_limit_leaves_remainder() {
        let harness = Harness::new().with_queue();
        let queue = harness.queue.clone().unwrap();
        let workflow = Workflow::new("Nurture", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::update_field("Score", "7").with_delay(1)),
        );
        harness.store.add_workflow(workflow.clone()).await;

        let record = lead();
        for minutes_ago in 1..=3 {
            queue
                .schedule_delayed(&due_action(&workflow, &record, minutes_ago))
                .await
                .unwrap();
        }

        let now = Utc::now();
        let claimed = queue.claim_due(now, 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed[0].run_at <= claimed[1].run_at);

        let rest = queue.claim_due(now, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(claimed.iter().all(|c| c.id != rest[0].id));
        assert_eq!(queue.pending().await.len(), 3);
    }

    #[tokio::test]
    async fn test_uncompleted_claim_returns_after_lease() {
        let queue = InMemoryDelayedQueue::new().with_lease(Duration::minutes(2));
        let workflow = Workflow::new("Nurture", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::update_field("Status", "Nurtured").with_delay(5)),
        );
        let delayed = due_action(&workflow, &lead(), 1);
        queue.schedule_delayed(&delayed).await.unwrap();

        let now = Utc::now();
        let first = queue.claim_due(now, 10).await.unwrap();
        assert_eq!(first.len(), 1);

        assert!(queue.claim_due(now + Duration::minutes(1), 10).await.unwrap().is_empty());

        let reclaimed = queue.claim_due(now + Duration::minutes(3), 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, delayed.id);

        queue.complete(delayed.id).await.unwrap();
        assert!(queue.claim_due(now + Duration::hours(1), 10).await.unwrap().is_empty());
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_job_completes_what_it_runs() {
        let harness = Harness::new();
        let queue = InMemoryDelayedQueue::new().with_lease(Duration::seconds(0));
        let workflow = Workflow::new("Nurture", "Lead", TriggerType::OnCreate).with_rule(
            Rule::new("Later").with_action(Action::update_field("Status", "Nurtured").with_delay(5)),
        );
        harness.store.add_workflow(workflow.clone()).await;
        queue.schedule_delayed(&due_action(&workflow, &lead(), 1)).await.unwrap();

        let job = DelayedActionJob::new(Arc::new(harness.engine()), Arc::new(queue.clone()), 50);
        assert_eq!(job.run().await.unwrap().succeeded, 1);

        let again = job.run().await.unwrap();
        assert_eq!(again, DelayedActionRunResult::default());
        assert!(queue.pending().await.is_empty());
    }
}

#[cfg(test)]
mod scheduled_workflow_tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_workflow_over_every_record_of_its_type() {
        let harness = Harness::new();
        harness.records.insert(ticket("Open")).await;
        harness
            .records
            .insert(Record::from_json("Ticket", "T-8", json!({ "Status": "Closed" })))
            .await;
        harness.records.insert(lead()).await;

        let workflow = Workflow::new("Stale tickets", "Ticket", TriggerType::Scheduled)
            .with_schedule("0 6 * * *")
            .with_rule(
                Rule::new("Still open")
                    .with_condition(Condition::equals("Status", "Open"))
                    .with_action(Action::update_field("Priority", "Urgent")),
            );

        harness.store.add_workflow(workflow.clone()).await;

        let job = scheduled_job(&harness, &workflow);
        let result = job.run().await.unwrap();

        assert_eq!(
            result,
            ScheduledRunResult {
                records_checked: 2,
                records_matched: 1,
                actions_failed: 0,
            }
        );
        let saved = harness.store.saved_changes("Ticket", "T-7").await.unwrap();
        assert_eq!(saved.get("Priority"), Some(&json!("Urgent")));
        assert!(harness.store.saved_changes("Ticket", "T-8").await.is_none());
    }

    #[tokio::test]
    async fn test_inactive_scheduled_workflow_does_nothing() {
        let harness = Harness::new();
        harness.records.insert(ticket("Open")).await;

        let workflow = Workflow::new("Paused", "Ticket", TriggerType::Scheduled)
            .inactive()
            .with_rule(Rule::new("Always").with_action(Action::update_field("Priority", "Low")));

        harness.store.add_workflow(workflow.clone()).await;

        let result = scheduled_job(&harness, &workflow).run().await.unwrap();

        assert_eq!(result, ScheduledRunResult::default());
        assert!(harness.store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_deactivation_applies_on_next_tick() {
        let harness = Harness::new();
        harness.records.insert(ticket("Open")).await;

        let workflow = Workflow::new("Escalate", "Ticket", TriggerType::Scheduled)
            .with_schedule("*/5 * * * *")
            .with_rule(Rule::new("Always").with_action(Action::update_field("Priority", "High")));
        harness.store.add_workflow(workflow.clone()).await;

        let job = scheduled_job(&harness, &workflow);
        assert_eq!(job.run().await.unwrap().records_matched, 1);
        let logs_after_first_tick = harness.store.logs().await.len();

        assert!(harness.store.set_workflow_active(workflow.id, false).await);
        let result = job.run().await.unwrap();

        assert_eq!(result, ScheduledRunResult::default());
        assert_eq!(harness.store.logs().await.len(), logs_after_first_tick);
    }

    #[tokio::test]
    async fn test_removed_workflow_is_skipped() {
        let harness = Harness::new();
        harness.records.insert(ticket("Open")).await;

        let workflow = Workflow::new("Escalate", "Ticket", TriggerType::Scheduled)
            .with_schedule("*/5 * * * *")
            .with_rule(Rule::new("Always").with_action(Action::update_field("Priority", "High")));
        harness.store.add_workflow(workflow.clone()).await;
        let job = scheduled_job(&harness, &workflow);

        harness.store.remove_workflow(workflow.id).await;

        assert_eq!(job.run().await.unwrap(), ScheduledRunResult::default());
        assert!(harness.store.saved_changes("Ticket", "T-7").await.is_none());
    }

    #[tokio::test]
    async fn test_edited_rules_apply_on_next_tick() {
        let harness = Harness::new();
        harness.records.insert(ticket("Open")).await;

        let workflow = Workflow::new("Escalate", "Ticket", TriggerType::Scheduled)
            .with_schedule("*/5 * * * *")
            .with_rule(
                Rule::new("Closed only")
                    .with_condition(Condition::equals("Status", "Closed"))
                    .with_action(Action::update_field("Priority", "High")),
            );
        harness.store.add_workflow(workflow.clone()).await;
        let job = scheduled_job(&harness, &workflow);
        assert_eq!(job.run().await.unwrap().records_matched, 0);

        let mut edited = workflow.clone();
        edited.rules[0].conditions = vec![Condition::equals("Status", "Open")];
        harness.store.remove_workflow(workflow.id).await;
        harness.store.add_workflow(edited).await;

        assert_eq!(job.run().await.unwrap().records_matched, 1);
    }
}
