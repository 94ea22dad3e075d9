//! PostgreSQL queue tests. Require Docker.
//!
//! ```bash
//! cargo test -p dispatch --test postgres_queue -- --ignored
//! ```

use std::time::Duration;

use chrono::Utc;
use common::{MessageId, shutdown_channel};
use dispatch::{MessageQueue, PostgresMessageQueue, QueuedEvent};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

fn event(event_type: &str) -> QueuedEvent {
    QueuedEvent {
        id: MessageId::new(),
        event_type: event_type.to_string(),
        aggregate_type: "Registration".to_string(),
        aggregate_id: Uuid::new_v4(),
        occurred_at: Utc::now(),
        payload: serde_json::json!({"type": event_type}),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_consumers_never_share_an_event() {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let pool = PgPool::connect(&format!("postgres://postgres:postgres@{host}:{port}/postgres"))
        .await
        .unwrap();
    sqlx::raw_sql(include_str!("../../../migrations/002_create_message_queue.sql"))
        .execute(&pool)
        .await
        .unwrap();

    let queue = PostgresMessageQueue::new(pool, Duration::from_millis(50));
    for i in 0..20 {
        queue.enqueue(&event(&format!("E{i}"))).await.unwrap();
    }

    let (_trigger, signal) = shutdown_channel();
    let consumers: Vec<_> = (0..4).map(|_| {
        let queue = queue.clone();
        let mut signal = signal.clone();
        tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(event) = queue.dequeue(&mut signal).await.unwrap() {
                taken.push(event.id);
            }
            taken
        })
    })
    .collect();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 20);
}
