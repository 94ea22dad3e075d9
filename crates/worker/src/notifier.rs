//! Registrant notifications driven by registration events.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::{EventId, MessageId, RegistrantId, RegistrationId};
use dispatch::{EventHandler, HandlerError, QueuedEvent};
use domain::{RegistrationEvent, RegistrationStatus};
use serde::Serialize;
use tokio::sync::Mutex;

/// A message delivered to a registrant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// The queued event this notification was produced from.
    pub source: MessageId,
    pub registrant_id: RegistrantId,
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    pub kind: String,
    pub text: String,
}

#[derive(Default)]
struct LogState {
    seen: HashSet<MessageId>,
    entries: Vec<Notification>,
}

/// Delivered notifications, deduplicated on the source event id.
#[derive(Clone, Default)]
pub struct NotificationLog {
    state: Arc<Mutex<LogState>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `notification` unless its source event was already delivered.
    /// Returns true if it was new.
    pub async fn record(&self, notification: Notification) -> bool {
        let mut state = self.state.lock().await;
        if !state.seen.insert(notification.source) {
            return false;
        }
        state.entries.push(notification);
        true
    }

    pub async fn entries(&self) -> Vec<Notification> {
        self.state.lock().await.entries.clone()
    }

    pub async fn for_registrant(&self, registrant_id: RegistrantId) -> Vec<Notification> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|n| n.registrant_id == registrant_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn describe(event: &RegistrationEvent) -> String {
    match event {
        RegistrationEvent::RegistrationConfirmed(_) => "Your seat is confirmed.".to_string(),
        RegistrationEvent::RegistrationWaitlisted(data) => {
            format!("The event is full. You are number {} on the waitlist.", data.position)
        }
        RegistrationEvent::RegistrationPromoted(_) => {
            "A seat opened up and your registration is now confirmed.".to_string()
        }
        RegistrationEvent::RegistrationCancelled(data) => match data.previous_status {
            RegistrationStatus::Waitlisted => "You have left the waitlist.".to_string(),
            _ => "Your registration has been cancelled.".to_string(),
        },
        RegistrationEvent::WaitlistPositionChanged(data) => {
            format!("You moved up to number {} on the waitlist.", data.new_position)
        }
    }
}

/// Tells registrants about changes to their registration.
///
/// Delivery is idempotent per source event, so redelivered or retried events
/// produce one notification.
pub struct RegistrantNotifier {
    log: NotificationLog,
}

impl RegistrantNotifier {
    pub fn new(log: NotificationLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventHandler for RegistrantNotifier {
    fn name(&self) -> &'static str {
        "registrant-notifier"
    }

    async fn handle(&self, event: &QueuedEvent) -> Result<(), HandlerError> {
        let decoded: RegistrationEvent = event
            .decode()
            .map_err(|e| HandlerError::permanent(format!("undecodable {}: {e}", event.event_type)))?;
        let subject = decoded.subject();

        let notification = Notification {
            source: event.id,
            registrant_id: subject.registrant_id,
            registration_id: subject.registration_id,
            event_id: subject.event_id,
            kind: event.event_type.clone(),
            text: describe(&decoded),
        };

        if self.log.record(notification).await {
            tracing::info!(
                registrant_id = %subject.registrant_id,
                event_type = %event.event_type,
                "Registrant notified"
            );
        } else {
            tracing::debug!(message_id = %event.id, "Duplicate notification suppressed");
        }
        Ok(())
    }
}
