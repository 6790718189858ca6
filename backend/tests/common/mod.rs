// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};
use tracing_subscriber;

use automation_backend::services::memory::{
    InMemoryDelayedQueue, RecordingEmailSender, RecordingNotificationSender,
    RecordingWebhookDispatcher, StaticUserDirectory,
};
use automation_backend::services::{DelayedActionScheduler, UserContact};
use automation_backend::store::{InMemoryRecordStore, InMemoryWorkflowStore};
use automation_backend::workflows::RecordLinkRegistry;
use automation_backend::{Collaborators, WorkflowEngine};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

/// Every collaborator the engine needs, held in memory.
pub struct MemoryStack {
    pub store: InMemoryWorkflowStore,
    pub records: InMemoryRecordStore,
    pub email: RecordingEmailSender,
    pub notifications: RecordingNotificationSender,
    pub webhooks: RecordingWebhookDispatcher,
    pub queue: InMemoryDelayedQueue,
    pub users: StaticUserDirectory,
}

impl MemoryStack {
    pub fn new() -> Self {
        init_test_logging();
        Self {
            store: InMemoryWorkflowStore::new(),
            records: InMemoryRecordStore::new(),
            email: RecordingEmailSender::new(),
            notifications: RecordingNotificationSender::new(),
            webhooks: RecordingWebhookDispatcher::new(),
            queue: InMemoryDelayedQueue::new(),
            users: StaticUserDirectory::new()
                .with_user(UserContact::new("agent-1", Some("agent1@example.com")))
                .with_user(UserContact::new("agent-2", Some("agent2@example.com"))),
        }
    }

    pub fn engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(Collaborators {
            store: Arc::new(self.store.clone()),
            records: Arc::new(self.records.clone()),
            email: Arc::new(self.email.clone()),
            notifications: Arc::new(self.notifications.clone()),
            webhooks: Arc::new(self.webhooks.clone()),
            users: Arc::new(self.users.clone()),
            scheduler: Some(Arc::new(self.queue.clone()) as Arc<dyn DelayedActionScheduler>),
            links: Arc::new(RecordLinkRegistry::default()),
        })
    }
}
