//! Core domain event and event-source traits.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Trait for domain events.
///
/// Domain events are immutable snapshots of something that already happened.
/// They live on the entity that raised them until the dispatcher drains them.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + std::fmt::Debug {
    /// Returns the event type name, used for handler routing and outbox topics.
    fn event_type(&self) -> &'static str;

    /// Returns the type name of the entity that raised the event.
    fn aggregate_type(&self) -> &'static str;

    /// Returns the id of the entity that raised the event.
    fn aggregate_id(&self) -> Uuid;

    /// Returns when the event was raised.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Returns true if the event must also reach the external bus.
    ///
    /// Integration events are written to the outbox in the same transaction
    /// as the state change that raised them.
    fn is_integration_event(&self) -> bool {
        false
    }
}

/// An entity that accumulates domain events until they are drained.
pub trait EventSource {
    /// The type of events this entity records.
    type Event: DomainEvent;

    /// Returns the events recorded since the last drain.
    fn pending_events(&self) -> &[Self::Event];

    /// Swaps the recorded events out for an empty list and returns them.
    ///
    /// A drained event is never returned by a later call.
    fn take_events(&mut self) -> Vec<Self::Event>;

    /// Returns true if events are waiting to be drained.
    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Opened { id: Uuid, at: DateTime<Utc> },
        Published { id: Uuid, at: DateTime<Utc> },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Opened { .. } => "TestOpened",
                TestEvent::Published { .. } => "TestPublished",
            }
        }

        fn aggregate_type(&self) -> &'static str {
            "TestEntity"
        }

        fn aggregate_id(&self) -> Uuid {
            match self {
                TestEvent::Opened { id, .. } | TestEvent::Published { id, .. } => *id,
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            match self {
                TestEvent::Opened { at, .. } | TestEvent::Published { at, .. } => *at,
            }
        }

        fn is_integration_event(&self) -> bool {
            matches!(self, TestEvent::Published { .. })
        }
    }

    #[derive(Default)]
    struct TestEntity {
        events: Vec<TestEvent>,
    }

    impl EventSource for TestEntity {
        type Event = TestEvent;

        fn pending_events(&self) -> &[TestEvent] {
            &self.events
        }

        fn take_events(&mut self) -> Vec<TestEvent> {
            std::mem::take(&mut self.events)
        }
    }

    #[test]
    fn take_events_drains_exactly_once() {
        let id = Uuid::new_v4();
        let mut entity = TestEntity::default();
        entity.events.push(TestEvent::Opened { id, at: Utc::now() });
        entity.events.push(TestEvent::Published { id, at: Utc::now() });
        assert!(entity.has_pending_events());

        let drained = entity.take_events();
        assert_eq!(drained.len(), 2);
        assert!(!entity.has_pending_events());
        assert!(entity.take_events().is_empty());
    }

    #[test]
    fn integration_flag_defaults_per_event() {
        let id = Uuid::new_v4();
        let opened = TestEvent::Opened { id, at: Utc::now() };
        let published = TestEvent::Published { id, at: Utc::now() };
        assert!(!opened.is_integration_event());
        assert!(published.is_integration_event());
        assert_eq!(published.event_type(), "TestPublished");
        assert_eq!(published.aggregate_id(), id);
    }
}
