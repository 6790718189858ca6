use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use automation_shared::DelayedAction;
use crate::error::WorkflowResult;

/// Accepts actions whose effect must land later.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DelayedActionScheduler: Send + Sync {
    async fn schedule_delayed(&self, delayed: &DelayedAction) -> WorkflowResult<()>;
}

/// Hands out delayed actions that have come due.
///
/// A claim leases the action to the caller. Once it has run, the caller
/// calls `complete`; a lease that runs out without completion makes the
/// action claimable again.
#[async_trait]
pub trait DelayedActionSource: Send + Sync {
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WorkflowResult<Vec<DelayedAction>>;

    async fn complete(&self, delayed_id: Uuid) -> WorkflowResult<()>;
}

#[derive(Clone)]
pub struct PgDelayedActionQueue {
    db_pool: PgPool,
    lease: Duration,
}

impl PgDelayedActionQueue {
    /// Queue with a five minute claim lease.
    pub fn new(db_pool: PgPool) -> Self {
        Self {
            db_pool,
            lease: Duration::minutes(5),
        }
    }

    pub fn with_lease_timeout(db_pool: PgPool, lease_secs: u32) -> Self {
        Self {
            db_pool,
            lease: Duration::seconds(i64::from(lease_secs)),
        }
    }
}

#[async_trait]
impl DelayedActionScheduler for PgDelayedActionQueue {
    async fn schedule_delayed(&self, delayed: &DelayedAction) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_delayed_actions
                (id, action_id, rule_id, workflow_id, record_type, record_id, record_snapshot,
                 acting_user_id, tenant_id, run_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(delayed.id)
        .bind(delayed.action_id)
        .bind(delayed.rule_id)
        .bind(delayed.workflow_id)
        .bind(&delayed.record_type)
        .bind(&delayed.record_id)
        .bind(&delayed.record_snapshot)
        .bind(&delayed.acting_user_id)
        .bind(&delayed.tenant_id)
        .bind(delayed.run_at)
        .bind(delayed.created_at)
        .execute(&self.db_pool)
        .await?;

        debug!("Delayed action {} scheduled for {}", delayed.action_id, delayed.run_at);
        Ok(())
    }
}

#[async_trait]
impl DelayedActionSource for PgDelayedActionQueue {
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> WorkflowResult<Vec<DelayedAction>> {
        let lease_expires_at = now + self.lease;

        let claimed = sqlx::query_as::<_, DelayedAction>(
            r#"
            WITH claimable AS (
                SELECT id FROM workflow_delayed_actions
                WHERE completed_at IS NULL
                  AND run_at <= $1
                  AND (lease_expires_at IS NULL OR lease_expires_at <= $1)
                ORDER BY run_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE workflow_delayed_actions
            SET claimed_at = $1,
                lease_expires_at = $3
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, action_id, rule_id, workflow_id, record_type, record_id, record_snapshot,
                      acting_user_id, tenant_id, run_at, created_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease_expires_at)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(claimed)
    }

    async fn complete(&self, delayed_id: Uuid) -> WorkflowResult<()> {
        sqlx::query(
            r#"
            UPDATE workflow_delayed_actions
            SET completed_at = NOW(),
                lease_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(delayed_id)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }
}
