use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use automation_backend::config::Config;
use automation_backend::database;
use automation_backend::jobs::JobScheduler;
use automation_backend::services::{
    DelayedActionScheduler, HttpWebhookDispatcher, PgDelayedActionQueue, PgNotificationService, PgUserDirectory,
    SmtpEmailService,
};
use automation_backend::store::{PgRecordStore, PgWorkflowStore};
use automation_backend::workflows::{Collaborators, RecordLinkRegistry, WorkflowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db_pool = database::create_pool(&config.database_url).await?;
    database::migrate(&db_pool).await?;

    let store = Arc::new(PgWorkflowStore::new(db_pool.clone()));
    let records = Arc::new(PgRecordStore::new(db_pool.clone()));
    let delayed_queue = Arc::new(PgDelayedActionQueue::with_lease_timeout(
        db_pool.clone(),
        config.engine.delayed_lease_secs,
    ));

    if !config.smtp.is_configured() {
        tracing::warn!("SMTP credentials not set; SendEmail actions will use an unauthenticated relay");
    }

    let collaborators = Collaborators {
        store: store.clone(),
        records: records.clone(),
        email: Arc::new(SmtpEmailService::new(&config.smtp)?),
        notifications: Arc::new(PgNotificationService::new(db_pool.clone())),
        webhooks: Arc::new(HttpWebhookDispatcher::new(&config.webhook)?),
        users: Arc::new(PgUserDirectory::new(db_pool.clone())),
        scheduler: Some(delayed_queue.clone() as Arc<dyn DelayedActionScheduler>),
        links: Arc::new(RecordLinkRegistry::default()),
    };

    let engine = Arc::new(WorkflowEngine::new(collaborators).with_enabled(config.engine.enabled));

    let mut scheduler = JobScheduler::new(
        engine,
        store,
        records,
        delayed_queue,
        config.engine.clone(),
    )
    .await?;
    scheduler.start().await?;

    info!("Automation worker running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown().await?;
    Ok(())
}
