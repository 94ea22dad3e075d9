use std::time::Duration;

use async_trait::async_trait;
use common::{MessageId, ShutdownSignal};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::Result;
use crate::event::QueuedEvent;
use crate::queue::MessageQueue;

/// Queue backed by the `message_queue` table, shared by every consumer process.
///
/// Dequeue deletes the oldest row with `FOR UPDATE SKIP LOCKED`, so concurrent
/// consumers never receive the same event and never wait on each other.
#[derive(Clone)]
pub struct PostgresMessageQueue {
    pool: PgPool,
    poll_interval: Duration,
}

impl PostgresMessageQueue {
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    async fn take_next(&self) -> Result<Option<QueuedEvent>> {
        let row = sqlx::query(
            r#"
            DELETE FROM message_queue
            WHERE id = (
                SELECT id FROM message_queue
                ORDER BY seq ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, event_type, aggregate_type, aggregate_id, occurred_at, payload
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    fn row_to_event(row: PgRow) -> Result<QueuedEvent> {
        Ok(QueuedEvent {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

#[async_trait]
impl MessageQueue for PostgresMessageQueue {
    async fn enqueue(&self, event: &QueuedEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_queue (id, event_type, aggregate_type, aggregate_id, occurred_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, shutdown: &mut ShutdownSignal) -> Result<Option<QueuedEvent>> {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        if let Some(event) = self.take_next().await? {
            return Ok(Some(event));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = shutdown.triggered() => return Ok(None),
        }
        self.take_next().await
    }
}
