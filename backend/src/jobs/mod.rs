// Background Jobs
//
// Delayed action polling and Scheduled workflows, driven by
// tokio-cron-scheduler.

pub mod delayed_actions;
pub mod scheduled_workflows;
pub mod scheduler;

pub use delayed_actions::{DelayedActionJob, DelayedActionRunResult};
pub use scheduled_workflows::{ScheduledRunResult, ScheduledWorkflowJob};
pub use scheduler::{JobError, JobResult, JobScheduler};
