use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, MessageId, RegistrantId, RegistrationId};
use domain::{Registrant, Registration, RegistrationStatus, ScheduledEvent};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OutboxCounts, OutboxMessage, OutboxStatus, Result, StoreError,
    store::{OutboxStore, RegistrationStore, RegistrationTx},
};

const REGISTRATION_COLUMNS: &str =
    "id, event_id, registrant_id, status, position_in_queue, created_at, updated_at";

const OUTBOX_COLUMNS: &str = "id, message_type, payload, status, claimed_by, claimed_at, attempts, \
     last_error, next_attempt_at, created_at, processed_at";

/// PostgreSQL-backed store implementation.
///
/// The per-event critical section is a transaction-scoped advisory lock keyed
/// by [`EventId::lock_key`], so it is released by commit or rollback.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} out of range")))
}

fn to_u32(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} out of range")))
}

fn row_to_event(row: &PgRow) -> Result<ScheduledEvent> {
    Ok(ScheduledEvent {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        title: row.try_get("title")?,
        capacity: to_u32(row.try_get("capacity")?, "capacity")?,
        published: row.try_get("published")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
    })
}

fn row_to_registration(row: &PgRow) -> Result<Registration> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<RegistrationStatus>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let position = row
        .try_get::<Option<i32>, _>("position_in_queue")?
        .map(|p| to_u32(p, "position_in_queue"))
        .transpose()?;

    Ok(Registration::restore(
        RegistrationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        RegistrantId::from_uuid(row.try_get::<Uuid, _>("registrant_id")?),
        status,
        position,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    ))
}

fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage> {
    let status: String = row.try_get("status")?;
    Ok(OutboxMessage {
        id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
        message_type: row.try_get("message_type")?,
        payload: row.try_get("payload")?,
        status: status.parse()?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        attempts: to_u32(row.try_get("attempts")?, "attempts")?,
        last_error: row.try_get("last_error")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn position_param(registration: &Registration) -> Result<Option<i32>> {
    registration
        .position_in_queue()
        .map(|p| to_i32(p, "position_in_queue"))
        .transpose()
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx> {
        Ok(PostgresTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn insert_event(&self, event: &ScheduledEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, title, capacity, published, starts_at, ends_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.title)
        .bind(to_i32(event.capacity, "capacity")?)
        .bind(event.published)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_registrant(&self, registrant: &Registrant) -> Result<()> {
        sqlx::query("INSERT INTO registrants (id, identity) VALUES ($1, $2)")
            .bind(registrant.id.as_uuid())
            .bind(&registrant.identity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<ScheduledEvent>> {
        let row = sqlx::query(
            "SELECT id, title, capacity, published, starts_at, ends_at FROM events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn get_registration(&self, id: RegistrationId) -> Result<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn list_registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        let rows = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE event_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_registration).collect()
    }
}

/// Transaction over a [`PostgresStore`].
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistrationTx for PostgresTx {
    async fn lock_event(&mut self, event_id: EventId) -> Result<Option<ScheduledEvent>> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(event_id.lock_key())
            .execute(&mut *self.tx)
            .await?;

        let row = sqlx::query(
            "SELECT id, title, capacity, published, starts_at, ends_at FROM events WHERE id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn registrant_exists(&mut self, registrant_id: RegistrantId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM registrants WHERE id = $1)")
                .bind(registrant_id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn find_active_registration(
        &mut self,
        event_id: EventId,
        registrant_id: RegistrantId,
    ) -> Result<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE event_id = $1 AND registrant_id = $2 AND status <> 'Cancelled'"
        ))
        .bind(event_id.as_uuid())
        .bind(registrant_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn get_registration(&mut self, id: RegistrationId) -> Result<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn count_confirmed(&mut self, event_id: EventId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status = 'Confirmed'",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await?;

        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("confirmed count {count}")))
    }

    async fn waitlist(&mut self, event_id: EventId) -> Result<Vec<Registration>> {
        let rows = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE event_id = $1 AND status = 'Waitlisted' ORDER BY position_in_queue ASC"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_registration).collect()
    }

    async fn insert_registration(&mut self, registration: &Registration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO registrations (id, event_id, registrant_id, status, position_in_queue, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(registration.id().as_uuid())
        .bind(registration.event_id().as_uuid())
        .bind(registration.registrant_id().as_uuid())
        .bind(registration.status().as_str())
        .bind(position_param(registration)?)
        .bind(registration.created_at())
        .bind(registration.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("uq_active_registration")
            {
                return StoreError::DuplicateActiveRegistration {
                    event_id: registration.event_id(),
                    registrant_id: registration.registrant_id(),
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn update_registration(&mut self, registration: &Registration) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET status = $2, position_in_queue = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(registration.id().as_uuid())
        .bind(registration.status().as_str())
        .bind(position_param(registration)?)
        .bind(registration.updated_at())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!(
                "registration {} missing on update",
                registration.id()
            )));
        }
        Ok(())
    }

    async fn update_capacity(&mut self, event_id: EventId, capacity: u32) -> Result<()> {
        sqlx::query("UPDATE events SET capacity = $2 WHERE id = $1")
            .bind(event_id.as_uuid())
            .bind(to_i32(capacity, "capacity")?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_outbox_message(&mut self, message: &OutboxMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, message_type, payload, status, attempts, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.message_type)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(to_i32(message.attempts, "attempts")?)
        .bind(message.next_attempt_at)
        .bind(message.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn claimable(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_messages
            WHERE (status = 'Pending' AND next_attempt_at <= $1)
               OR (status = 'Processing' AND claimed_at < $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(lease_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_outbox).collect()
    }

    async fn try_claim(
        &self,
        id: MessageId,
        worker: &str,
        now: DateTime<Utc>,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Processing', claimed_by = $2, claimed_at = $3
            WHERE id = $1
              AND ((status = 'Pending' AND next_attempt_at <= $3)
                OR (status = 'Processing' AND claimed_at < $4))
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(now)
        .bind(lease_cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(&self, id: MessageId, worker: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Processed', processed_at = $3
            WHERE id = $1 AND status = 'Processing' AND claimed_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_retry(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Pending', attempts = $3, last_error = $4, next_attempt_at = $5,
                claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND status = 'Processing' AND claimed_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(to_i32(attempts, "attempts")?)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        id: MessageId,
        worker: &str,
        attempts: u32,
        error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'Failed', attempts = $3, last_error = $4,
                claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND status = 'Processing' AND claimed_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(to_i32(attempts, "attempts")?)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_outbox).transpose()
    }

    async fn count_by_status(&self) -> Result<OutboxCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM outbox_messages GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = OutboxCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.add(status.parse::<OutboxStatus>()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}
