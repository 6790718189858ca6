// Workflow Triggers - Lifecycle events that start automation for a record

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::record::Record;
pub use automation_shared::TriggerType;

/// A trigger event that can initiate workflow execution
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    pub record: Record,
    /// State before the change; only meaningful for updates
    pub prior: Option<Record>,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Source of the trigger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    System,
    User(String),
    Api,
    Scheduler,
    Integration(String),
}

impl TriggerEvent {
    fn new(trigger_type: TriggerType, record: Record, prior: Option<Record>, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            record,
            prior,
            source,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn created(record: Record, source: EventSource) -> Self {
        Self::new(TriggerType::OnCreate, record, None, source)
    }

    pub fn updated(prior: Record, record: Record, source: EventSource) -> Self {
        Self::new(TriggerType::OnUpdate, record, Some(prior), source)
    }

    pub fn deleted(record: Record, source: EventSource) -> Self {
        Self::new(TriggerType::OnDelete, record, None, source)
    }

    pub fn manual(record: Record, user_id: &str) -> Self {
        Self::new(TriggerType::Manual, record, None, EventSource::User(user_id.to_string()))
    }

    pub fn scheduled(record: Record) -> Self {
        Self::new(TriggerType::Scheduled, record, None, EventSource::Scheduler)
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Ambient information for one automation invocation.
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    /// User whose change caused the trigger; default assignee and recipient
    pub acting_user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub cancellation: CancellationToken,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: &str) -> Self {
        Self {
            acting_user_id: Some(user_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context derived from an event's own metadata.
    pub fn from_event(event: &TriggerEvent) -> Self {
        let acting_user_id = match &event.source {
            EventSource::User(id) => Some(id.clone()),
            _ => None,
        };
        Self {
            acting_user_id,
            correlation_id: event.correlation_id.or(Some(event.event_id)),
            ..Self::default()
        }
    }
}
