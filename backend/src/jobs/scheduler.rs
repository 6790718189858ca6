// Job Scheduler - Central scheduler for automation background jobs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{DelayedActionJob, ScheduledWorkflowJob, scheduled_workflows::normalize_cron};
use crate::config::EngineConfig;
use crate::error::WorkflowError;
use crate::services::DelayedActionSource;
use crate::store::{RecordWriter, WorkflowStore};
use crate::workflows::WorkflowEngine;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Workflow error: {0}")]
    WorkflowError(#[from] WorkflowError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    delayed: Arc<dyn DelayedActionSource>,
    workflow_jobs: WorkflowJobs,
    config: EngineConfig,
}

/// Cron job registered for one workflow, with the schedule it was built from.
struct RegisteredSchedule {
    job_id: Uuid,
    schedule: String,
}

/// Keeps one cron job per active `Scheduled` workflow in step with the store.
#[derive(Clone)]
struct WorkflowJobs {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn WorkflowStore>,
    records: Arc<dyn RecordWriter>,
    registered: Arc<Mutex<HashMap<Uuid, RegisteredSchedule>>>,
}

impl JobScheduler {
    pub async fn new(
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn WorkflowStore>,
        records: Arc<dyn RecordWriter>,
        delayed: Arc<dyn DelayedActionSource>,
        config: EngineConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;
        let workflow_jobs = WorkflowJobs {
            scheduler: scheduler.clone(),
            engine: engine.clone(),
            store,
            records,
            registered: Arc::new(Mutex::new(HashMap::new())),
        };

        Ok(Self {
            scheduler,
            engine,
            delayed,
            workflow_jobs,
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting automation job scheduler");

        if self.config.delayed_poll_interval_secs == 0 {
            return Err(JobError::ConfigError(
                "delayed action poll interval must be positive".to_string(),
            ));
        }

        self.schedule_delayed_actions().await?;
        self.schedule_workflows().await?;

        self.scheduler.start().await?;

        info!("Automation job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down automation job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_delayed_actions(&self) -> JobResult<()> {
        let interval = self.config.delayed_poll_interval_secs;
        let engine = self.engine.clone();
        let source = self.delayed.clone();
        let batch_size = self.config.delayed_batch_size;

        let job = Job::new_repeated_async(Duration::from_secs(u64::from(interval)), move |_uuid, _lock| {
            let job = DelayedActionJob::new(engine.clone(), source.clone(), batch_size);

            Box::pin(async move {
                if let Err(e) = job.run().await {
                    error!("Delayed action job failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled delayed action polling every {} seconds", interval);

        Ok(())
    }

    /// Registers the current Scheduled workflows, then re-reads them every
    /// `schedule_refresh_secs` so new, edited and removed workflows are
    /// picked up without a restart.
    async fn schedule_workflows(&self) -> JobResult<()> {
        self.workflow_jobs.sync().await?;

        let refresh = self.config.schedule_refresh_secs;
        if refresh == 0 {
            info!("Scheduled workflow refresh disabled");
            return Ok(());
        }

        let workflow_jobs = self.workflow_jobs.clone();
        let job = Job::new_repeated_async(Duration::from_secs(u64::from(refresh)), move |_uuid, _lock| {
            let workflow_jobs = workflow_jobs.clone();

            Box::pin(async move {
                if let Err(e) = workflow_jobs.sync().await {
                    error!("Scheduled workflow refresh failed: {}", e);
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Refreshing scheduled workflows every {} seconds", refresh);

        Ok(())
    }
}

impl WorkflowJobs {
    async fn sync(&self) -> JobResult<()> {
        let workflows = self.store.scheduled_workflows().await?;
        let wanted: HashMap<Uuid, String> = workflows
            .iter()
            .filter_map(|w| w.schedule.as_deref().map(|s| (w.id, normalize_cron(s))))
            .collect();

        let mut registered = self.registered.lock().await;

        let stale: Vec<Uuid> = registered
            .iter()
            .filter(|(id, entry)| wanted.get(*id) != Some(&entry.schedule))
            .map(|(id, _)| *id)
            .collect();
        for workflow_id in stale {
            if let Some(entry) = registered.remove(&workflow_id) {
                self.scheduler.remove(&entry.job_id).await?;
                info!("Unscheduled workflow {} ('{}')", workflow_id, entry.schedule);
            }
        }

        for workflow in &workflows {
            let Some(schedule) = wanted.get(&workflow.id) else {
                continue;
            };
            if registered.contains_key(&workflow.id) {
                continue;
            }

            match self.workflow_job(workflow.id, schedule) {
                Ok(job) => {
                    let job_id = self.scheduler.add(job).await?;
                    registered.insert(
                        workflow.id,
                        RegisteredSchedule {
                            job_id,
                            schedule: schedule.clone(),
                        },
                    );
                    info!("Scheduled workflow '{}' with '{}'", workflow.name, schedule);
                }
                Err(e) => warn!(
                    "Workflow '{}' has an invalid schedule '{}': {}",
                    workflow.name, schedule, e
                ),
            }
        }

        debug!("{} scheduled workflow job(s) registered", registered.len());
        Ok(())
    }

    fn workflow_job(&self, workflow_id: Uuid, schedule: &str) -> Result<Job, JobSchedulerError> {
        let engine = self.engine.clone();
        let store = self.store.clone();
        let records = self.records.clone();

        Job::new_async(schedule, move |_uuid, _lock| {
            let job = ScheduledWorkflowJob::new(engine.clone(), store.clone(), records.clone(), workflow_id);

            Box::pin(async move {
                if let Err(e) = job.run().await {
                    error!("Scheduled workflow job failed: {}", e);
                }
            })
        })
    }
}
