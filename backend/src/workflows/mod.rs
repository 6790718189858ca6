// Workflow Automation Engine
//
// Record-centric automation: lifecycle triggers select workflows, rule
// conditions decide what matched, actions apply the effects.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod links;
pub mod record;
pub mod templating;
pub mod triggers;

pub use actions::{Action, ActionDefinition, ActionKind, ActionResult};
pub use conditions::{Condition, ConditionEvaluator, ConditionOperator, LogicMode};
pub use engine::{Rule, TriggerOutcome, Workflow, WorkflowEngine};
pub use executor::{ActionExecutor, Collaborators, ExecutionContext};
pub use links::RecordLinkRegistry;
pub use record::{FieldKind, Record, RecordSchema};
pub use triggers::{EventSource, TriggerContext, TriggerEvent, TriggerType};

pub(crate) fn default_true() -> bool {
    true
}
