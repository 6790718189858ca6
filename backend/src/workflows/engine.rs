// Workflow Engine - Selects, evaluates and runs workflows for record events

use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use automation_shared::{DelayedAction, ExecutionLog, ExecutionStatus};
use super::actions::{Action, ActionResult};
use super::conditions::{deserialize_conditions, Condition, ConditionEvaluator, LogicMode};
use super::executor::{ActionExecutor, Collaborators, ExecutionContext};
use super::record::Record;
use super::triggers::{TriggerContext, TriggerEvent, TriggerType};
use super::default_true;
use crate::store::WorkflowStore;

/// A named automation bound to a record type and a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub record_type: String,
    pub trigger_type: TriggerType,
    /// Cron expression for `Scheduled` workflows
    #[serde(default)]
    pub schedule: Option<String>,
    /// Monitored fields; only consulted for `OnUpdate`
    #[serde(default)]
    pub trigger_fields: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub stop_on_match: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Conditions plus the actions to run when they hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub workflow_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default, deserialize_with = "deserialize_conditions")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: LogicMode,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Workflow {
    pub fn new(name: &str, record_type: &str, trigger_type: TriggerType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            trigger_type,
            schedule: None,
            trigger_fields: Vec::new(),
            is_active: true,
            execution_order: 0,
            stop_on_match: false,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, mut rule: Rule) -> Self {
        rule.workflow_id = self.id;
        self.rules.push(rule);
        self
    }

    pub fn monitoring(mut self, fields: &[&str]) -> Self {
        self.trigger_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_schedule(mut self, cron: &str) -> Self {
        self.schedule = Some(cron.to_string());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.execution_order = order;
        self
    }

    pub fn stop_on_match(mut self) -> Self {
        self.stop_on_match = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Point rule and action back-references at their parents.
    pub fn link_children(&mut self) {
        for rule in &mut self.rules {
            rule.workflow_id = self.id;
            for action in &mut rule.actions {
                action.rule_id = rule.id;
            }
        }
    }

    fn active_rules(&self) -> Vec<&Rule> {
        let mut rules: Vec<&Rule> = self.rules.iter().filter(|r| r.is_active).collect();
        rules.sort_by_key(|r| r.execution_order);
        rules
    }
}

impl Rule {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            name: name.to_string(),
            execution_order: 0,
            conditions: Vec::new(),
            logic: LogicMode::All,
            is_active: true,
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: LogicMode) -> Self {
        self.logic = logic;
        self
    }

    pub fn with_action(mut self, mut action: Action) -> Self {
        action.rule_id = self.id;
        self.actions.push(action);
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

    fn active_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().filter(|a| a.is_active).collect();
        actions.sort_by_key(|a| a.execution_order);
        actions
    }
}

/// Summary of one `process_trigger` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriggerOutcome {
    pub workflows_evaluated: usize,
    pub workflows_matched: usize,
    pub workflows_skipped: usize,
    pub rules_matched: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_pending: usize,
    pub cancelled: bool,
}

impl TriggerOutcome {
    fn record(&mut self, result: &ActionResult) {
        match result.status {
            ExecutionStatus::Success => self.actions_succeeded += 1,
            ExecutionStatus::Pending => self.actions_pending += 1,
            ExecutionStatus::Failed => self.actions_failed += 1,
            ExecutionStatus::Skipped => {}
        }
    }
}

enum WorkflowRun {
    Skipped,
    NoMatch,
    Matched,
    Cancelled,
}

enum RuleRun {
    Completed { succeeded: usize, failed: usize, pending: usize },
    Cancelled,
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    executor: ActionExecutor,
    enabled: bool,
}

impl WorkflowEngine {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            store: collaborators.store.clone(),
            executor: ActionExecutor::new(collaborators),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Active workflows for a record type and trigger, in execution order.
    pub async fn get_applicable_workflows(
        &self,
        record_type: &str,
        trigger: TriggerType,
    ) -> crate::error::WorkflowResult<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .store
            .load_workflows(record_type, trigger)
            .await?
            .into_iter()
            .filter(|w| w.is_active && w.trigger_type == trigger && w.record_type == record_type)
            .collect();
        workflows.sort_by_key(|w| w.execution_order);
        Ok(workflows)
    }

    /// Run automation for one record lifecycle event. Never fails: every
    /// problem is recorded in the execution log instead.
    #[instrument(
        skip_all,
        fields(
            trigger = %trigger,
            record_type = %record.record_type(),
            record_id = %record.id(),
            correlation_id = ?context.correlation_id,
        )
    )]
    pub async fn process_trigger(
        &self,
        record: &mut Record,
        trigger: TriggerType,
        prior: Option<&Record>,
        context: &TriggerContext,
    ) -> TriggerOutcome {
        let mut outcome = TriggerOutcome::default();

        if !self.enabled {
            debug!("Automation disabled; ignoring {} for {} {}", trigger, record.record_type(), record.id());
            return outcome;
        }
        if context.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        let record_type = record.record_type().to_string();
        let workflows = match self.get_applicable_workflows(&record_type, trigger).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("Failed to load {} workflows for {}: {}", trigger, record_type, e);
                return outcome;
            }
        };

        debug!(
            "{} {} workflow(s) apply to {} {}",
            workflows.len(),
            trigger,
            record_type,
            record.id()
        );

        for workflow in &workflows {
            if context.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            match self.run_guarded(workflow, record, trigger, prior, context, &mut outcome).await {
                WorkflowRun::Matched if workflow.stop_on_match => {
                    info!("Workflow '{}' matched with stop-on-match; skipping the rest", workflow.name);
                    break;
                }
                WorkflowRun::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
                _ => {}
            }
        }

        self.persist_changes(record).await;
        outcome
    }

    /// Run a single workflow against a record, bypassing selection.
    pub async fn process_workflow(
        &self,
        workflow: &Workflow,
        record: &mut Record,
        trigger: TriggerType,
        context: &TriggerContext,
    ) -> TriggerOutcome {
        let mut outcome = TriggerOutcome::default();

        if !self.enabled || !workflow.is_active {
            return outcome;
        }

        if let WorkflowRun::Cancelled = self.run_guarded(workflow, record, trigger, None, context, &mut outcome).await {
            outcome.cancelled = true;
        }

        self.persist_changes(record).await;
        outcome
    }

    /// Entry point for hosts that publish [`TriggerEvent`]s.
    pub async fn process_event(&self, event: &mut TriggerEvent, context: &TriggerContext) -> TriggerOutcome {
        let trigger = event.trigger_type;
        let prior = event.prior.take();
        let outcome = self.process_trigger(&mut event.record, trigger, prior.as_ref(), context).await;
        event.prior = prior;
        outcome
    }

    /// Execute a delayed action that has come due, against its snapshot.
    pub async fn run_delayed_action(&self, delayed: &DelayedAction) -> ActionResult {
        let context = ExecutionContext {
            workflow_id: delayed.workflow_id,
            rule_id: delayed.rule_id,
            acting_user_id: delayed.acting_user_id.clone(),
            tenant_id: delayed.tenant_id.clone(),
        };
        let log = |status| {
            ExecutionLog::new(delayed.workflow_id, delayed.record_type.clone(), delayed.record_id.clone(), status)
                .for_action(delayed.rule_id, delayed.action_id)
        };

        let mut record = match Record::from_snapshot(delayed.record_snapshot.clone()) {
            Ok(record) => record,
            Err(e) => {
                let result = ActionResult::failure(format!("unreadable record snapshot: {}", e));
                self.write_log(log(ExecutionStatus::Failed).with_error(result.message.clone())).await;
                return result;
            }
        };

        let action = match self.store.load_action(delayed.action_id).await {
            Ok(Some(action)) if action.is_active => action,
            Ok(_) => {
                let result = ActionResult::skipped("action no longer exists or is inactive");
                self.write_log(log(ExecutionStatus::Skipped).with_details(result.message.clone())).await;
                return result;
            }
            Err(e) => {
                let result = ActionResult::failure(format!("failed to load action: {}", e));
                self.write_log(log(ExecutionStatus::Failed).with_error(result.message.clone())).await;
                return result;
            }
        };

        let result = self.executor.execute_now(&action, &mut record, &context).await;
        self.write_log(Self::action_log(log(result.status), &result)).await;
        self.persist_changes(&mut record).await;
        result
    }

    /// Workflow-level failure boundary: a panic anywhere inside becomes a
    /// failed workflow entry.
    async fn run_guarded(
        &self,
        workflow: &Workflow,
        record: &mut Record,
        trigger: TriggerType,
        prior: Option<&Record>,
        context: &TriggerContext,
        outcome: &mut TriggerOutcome,
    ) -> WorkflowRun {
        let started = Instant::now();
        let run = AssertUnwindSafe(self.run_workflow(workflow, record, trigger, prior, context, outcome))
            .catch_unwind()
            .await;

        match run {
            Ok(run) => run,
            Err(_) => {
                error!("Workflow '{}' panicked", workflow.name);
                self.write_log(
                    self.workflow_log(workflow, record, ExecutionStatus::Failed)
                        .with_error("workflow evaluation panicked")
                        .with_duration(started.elapsed().as_millis() as i64),
                )
                .await;
                WorkflowRun::NoMatch
            }
        }
    }

    async fn run_workflow(
        &self,
        workflow: &Workflow,
        record: &mut Record,
        trigger: TriggerType,
        prior: Option<&Record>,
        context: &TriggerContext,
        outcome: &mut TriggerOutcome,
    ) -> WorkflowRun {
        let started = Instant::now();
        outcome.workflows_evaluated += 1;

        if trigger == TriggerType::OnUpdate && !workflow.trigger_fields.is_empty() {
            let changed = prior
                .map(|p| record.changed_fields(p, &workflow.trigger_fields))
                .unwrap_or_default();

            if changed.is_empty() {
                debug!("Workflow '{}' skipped: monitored fields unchanged", workflow.name);
                outcome.workflows_skipped += 1;
                self.write_log(
                    self.workflow_log(workflow, record, ExecutionStatus::Skipped)
                        .with_details(format!(
                            "none of the monitored fields changed ({})",
                            workflow.trigger_fields.join(", ")
                        )),
                )
                .await;
                return WorkflowRun::Skipped;
            }
        }

        let rules = workflow.active_rules();
        let mut matched_rules = 0;
        let mut failed_rules = 0;

        for rule in &rules {
            if context.is_cancelled() {
                return WorkflowRun::Cancelled;
            }

            let evaluation = panic::catch_unwind(AssertUnwindSafe(|| {
                ConditionEvaluator::evaluate(&rule.conditions, rule.logic, &*record, prior)
            }));

            let is_match = match evaluation {
                Ok(is_match) => is_match,
                Err(_) => {
                    error!("Conditions of rule '{}' panicked", rule.name);
                    failed_rules += 1;
                    self.write_log(
                        self.workflow_log(workflow, record, ExecutionStatus::Failed)
                            .for_rule(rule.id)
                            .with_error("condition evaluation panicked"),
                    )
                    .await;
                    continue;
                }
            };

            if !is_match {
                debug!("Rule '{}' did not match", rule.name);
                continue;
            }

            matched_rules += 1;
            outcome.rules_matched += 1;
            let rule_started = Instant::now();

            match self.run_rule_actions(workflow, rule, record, context, outcome).await {
                RuleRun::Cancelled => return WorkflowRun::Cancelled,
                RuleRun::Completed { succeeded, failed, pending } => {
                    let total = succeeded + failed + pending;
                    let status = if failed > 0 {
                        failed_rules += 1;
                        ExecutionStatus::Failed
                    } else {
                        ExecutionStatus::Success
                    };
                    let mut entry = self
                        .workflow_log(workflow, record, status)
                        .for_rule(rule.id)
                        .with_details(format!(
                            "{} of {} actions succeeded ({} pending)",
                            succeeded + pending,
                            total,
                            pending
                        ))
                        .with_duration(rule_started.elapsed().as_millis() as i64);
                    if failed > 0 {
                        entry = entry.with_error(format!("{} of {} actions failed", failed, total));
                    }
                    self.write_log(entry).await;
                }
            }
        }

        let duration = started.elapsed().as_millis() as i64;

        if matched_rules == 0 {
            let entry = if failed_rules == 0 {
                self.workflow_log(workflow, record, ExecutionStatus::Skipped)
                    .with_details(correlated("no rules matched".to_string(), context))
            } else {
                self.workflow_log(workflow, record, ExecutionStatus::Failed)
                    .with_error(format!("{} rule(s) could not be evaluated", failed_rules))
            };
            self.write_log(entry.with_duration(duration)).await;
            return WorkflowRun::NoMatch;
        }

        outcome.workflows_matched += 1;
        let details = correlated(format!("{} of {} rules matched", matched_rules, rules.len()), context);
        let entry = if failed_rules == 0 {
            self.workflow_log(workflow, record, ExecutionStatus::Success)
                .with_details(details)
        } else {
            self.workflow_log(workflow, record, ExecutionStatus::Failed)
                .with_details(details)
                .with_error(format!("{} rule(s) had failures", failed_rules))
        };
        self.write_log(entry.with_duration(duration)).await;

        info!(
            "Workflow '{}' matched {} rule(s) for {} {}",
            workflow.name,
            matched_rules,
            record.record_type(),
            record.id()
        );
        WorkflowRun::Matched
    }

    async fn run_rule_actions(
        &self,
        workflow: &Workflow,
        rule: &Rule,
        record: &mut Record,
        context: &TriggerContext,
        outcome: &mut TriggerOutcome,
    ) -> RuleRun {
        let execution = ExecutionContext::from_trigger(workflow.id, rule.id, context);
        let (mut succeeded, mut failed, mut pending) = (0, 0, 0);

        for action in rule.active_actions() {
            if context.is_cancelled() {
                return RuleRun::Cancelled;
            }

            let result = self.executor.execute(action, record, &execution).await;
            outcome.record(&result);
            match result.status {
                ExecutionStatus::Success => succeeded += 1,
                ExecutionStatus::Pending => pending += 1,
                _ => failed += 1,
            }

            let entry = self
                .workflow_log(workflow, record, result.status)
                .for_action(rule.id, action.id);
            self.write_log(Self::action_log(entry, &result)).await;
        }

        RuleRun::Completed { succeeded, failed, pending }
    }

    fn workflow_log(&self, workflow: &Workflow, record: &Record, status: ExecutionStatus) -> ExecutionLog {
        ExecutionLog::new(workflow.id, record.record_type(), record.id(), status)
    }

    fn action_log(entry: ExecutionLog, result: &ActionResult) -> ExecutionLog {
        let entry = entry.with_duration(result.duration_ms);
        if result.is_failure() {
            entry.with_error(result.message.clone())
        } else {
            entry.with_details(result.message.clone())
        }
    }

    /// Log writes are best effort and never interrupt processing.
    async fn write_log(&self, entry: ExecutionLog) {
        if let Err(e) = self.store.append_log(&entry).await {
            warn!(
                "Failed to write execution log for workflow {} ({}): {}",
                entry.workflow_id, entry.status, e
            );
        }
    }

    async fn persist_changes(&self, record: &mut Record) {
        if !record.is_dirty() {
            return;
        }

        let changes = record.changes();
        match self
            .store
            .save_record_changes(record.record_type(), record.id(), &changes)
            .await
        {
            Ok(()) => {
                debug!("Saved {} changed field(s) on {} {}", changes.len(), record.record_type(), record.id());
                record.clear_changes();
            }
            Err(e) => error!(
                "Failed to save automation changes to {} {}: {}",
                record.record_type(),
                record.id(),
                e
            ),
        }
    }
}

/// Suffix workflow log details with the event's correlation id, when known.
fn correlated(details: String, context: &TriggerContext) -> String {
    match context.correlation_id {
        Some(correlation_id) => format!("{} [correlation {}]", details, correlation_id),
        None => details,
    }
}
