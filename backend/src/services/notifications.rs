use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::error::WorkflowResult;

/// Delivery channels as a bit set, stored as a single integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelMask(i32);

impl ChannelMask {
    pub const IN_APP: ChannelMask = ChannelMask(1);
    pub const EMAIL: ChannelMask = ChannelMask(2);
    pub const SMS: ChannelMask = ChannelMask(4);
    pub const PUSH: ChannelMask = ChannelMask(8);

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn contains(&self, other: ChannelMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Comma-separated channel names; unknown names are ignored and an empty
    /// result falls back to in-app.
    pub fn parse(names: &str) -> Self {
        let mask = names
            .split(',')
            .map(|name| name.trim().replace(['-', '_'], "").to_ascii_lowercase())
            .fold(0, |mask, name| {
                mask | match name.as_str() {
                    "inapp" => Self::IN_APP.0,
                    "email" => Self::EMAIL.0,
                    "sms" => Self::SMS.0,
                    "push" => Self::PUSH.0,
                    _ => 0,
                }
            });

        if mask == 0 { Self::IN_APP } else { ChannelMask(mask) }
    }
}

impl std::ops::BitOr for ChannelMask {
    type Output = ChannelMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChannelMask(self.0 | rhs.0)
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::IN_APP, "InApp"),
            (Self::EMAIL, "Email"),
            (Self::SMS, "Sms"),
            (Self::PUSH, "Push"),
        ]
        .into_iter()
        .filter(|(channel, _)| self.contains(*channel))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub channels: ChannelMask,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

/// In-app, SMS and push notification collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> WorkflowResult<Uuid>;
}

/// Writes notifications to the `notifications` table; delivery workers pick
/// them up from there by channel.
#[derive(Clone)]
pub struct PgNotificationService {
    db_pool: PgPool,
}

impl PgNotificationService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl NotificationSender for PgNotificationService {
    async fn send(&self, notification: &Notification) -> WorkflowResult<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, channels, entity_type, entity_id, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
            "#,
        )
        .bind(id)
        .bind(&notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.channels.bits())
        .bind(&notification.entity_type)
        .bind(&notification.entity_id)
        .execute(&self.db_pool)
        .await?;

        debug!(
            "Queued notification {} for user {} via {}",
            id, notification.user_id, notification.channels
        );
        Ok(id)
    }
}
