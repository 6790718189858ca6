// Record automation engine: workflows, rules and actions triggered by
// business record lifecycle events.

pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod services;
pub mod store;
pub mod workflows;


pub use error::{WorkflowError, WorkflowResult};
pub use workflows::{
    Action, Collaborators, Condition, Record, Rule, TriggerContext, TriggerOutcome, TriggerType,
    Workflow, WorkflowEngine,
};
