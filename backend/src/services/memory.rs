// In-process collaborators that record what automation asked them to do.
// Used by tests and by embedders that run the engine without infrastructure.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use automation_shared::DelayedAction;
use crate::error::{WorkflowError, WorkflowResult};
use super::{
    DelayedActionScheduler, DelayedActionSource, EmailSender, Notification, NotificationSender,
    UserContact, UserDirectory, WebhookDelivery, WebhookDispatcher, WebhookRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

#[derive(Clone, Default)]
pub struct RecordingEmailSender {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    failure: Option<String>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with `message` (and is not recorded).
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str, is_html: bool) -> WorkflowResult<()> {
        if let Some(message) = &self.failure {
            return Err(WorkflowError::collaborator("email", message));
        }
        self.sent.lock().await.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            is_html,
        });
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotificationSender {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send(&self, notification: &Notification) -> WorkflowResult<Uuid> {
        self.sent.lock().await.push(notification.clone());
        Ok(Uuid::new_v4())
    }
}

#[derive(Clone)]
pub struct RecordingWebhookDispatcher {
    delivered: Arc<Mutex<Vec<WebhookRequest>>>,
    status_code: u16,
}

impl Default for RecordingWebhookDispatcher {
    fn default() -> Self {
        Self {
            delivered: Arc::default(),
            status_code: 200,
        }
    }
}

impl RecordingWebhookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responds with `status_code`; anything outside 2xx is a failed delivery.
    pub fn responding_with(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub async fn delivered(&self) -> Vec<WebhookRequest> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl WebhookDispatcher for RecordingWebhookDispatcher {
    async fn deliver(&self, request: &WebhookRequest) -> WorkflowResult<WebhookDelivery> {
        self.delivered.lock().await.push(request.clone());
        if (200..300).contains(&self.status_code) {
            Ok(WebhookDelivery {
                status_code: self.status_code,
                attempts: 1,
            })
        } else {
            Err(WorkflowError::collaborator(
                "webhook",
                format!("{} responded with {}", request.url, self.status_code),
            ))
        }
    }
}

#[derive(Clone, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserContact>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: UserContact) -> Self {
        self.users.insert(user.id.clone(), user);
        self
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn find_user(&self, user_id: &str) -> WorkflowResult<Option<UserContact>> {
        Ok(self.users.get(user_id).cloned())
    }
}

/// Delayed-action queue held in memory. A claim holds an entry for the
/// lease; `complete` removes it.
#[derive(Clone)]
pub struct InMemoryDelayedQueue {
    entries: Arc<Mutex<Vec<QueuedAction>>>,
    lease: Duration,
}

#[derive(Clone)]
struct QueuedAction {
    delayed: DelayedAction,
    lease_expires_at: Option<DateTime<Utc>>,
}

impl Default for InMemoryDelayedQueue {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            lease: Duration::minutes(5),
        }
    }
}

impl InMemoryDelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Everything not yet completed, claimed or not.
    pub async fn pending(&self) -> Vec<DelayedAction> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|entry| entry.delayed.clone())
            .collect()
    }
}

#[async_trait]
impl DelayedActionScheduler for InMemoryDelayedQueue {
    async fn schedule_delayed(&self, delayed: &DelayedAction) -> WorkflowResult<()> {
        self.entries.lock().await.push(QueuedAction {
            delayed: delayed.clone(),
            lease_expires_at: None,
        });
        Ok(())
    }
}

#[async_trait]
impl DelayedActionSource for InMemoryDelayedQueue {
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WorkflowResult<Vec<DelayedAction>> {
        let mut entries = self.entries.lock().await;
        entries.sort_by_key(|entry| entry.delayed.run_at);

        let limit = usize::try_from(limit).unwrap_or(0);
        let lease_expires_at = now + self.lease;

        Ok(entries
            .iter_mut()
            .filter(|entry| entry.delayed.run_at <= now)
            .filter(|entry| entry.lease_expires_at.map_or(true, |expires| expires <= now))
            .take(limit)
            .map(|entry| {
                entry.lease_expires_at = Some(lease_expires_at);
                entry.delayed.clone()
            })
            .collect())
    }

    async fn complete(&self, delayed_id: Uuid) -> WorkflowResult<()> {
        self.entries.lock().await.retain(|entry| entry.delayed.id != delayed_id);
        Ok(())
    }
}
