use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a scheduled event that registrants sign up for.
    ///
    /// Also the key of the per-event critical section: every capacity or
    /// waitlist mutation for one event is serialized on this value.
    EventId
);

uuid_id!(
    /// Identifier of a registrant (the person or account registering).
    RegistrantId
);

uuid_id!(
    /// Identifier of a single registration row.
    RegistrationId
);

uuid_id!(
    /// Identifier of an outbox or queue message.
    MessageId
);

impl EventId {
    /// Derives a 64-bit lock key from the identifier.
    ///
    /// Used as the advisory-lock key; collisions between distinct events only
    /// cause extra serialization, never a missed exclusion.
    pub fn lock_key(&self) -> i64 {
        let (high, low) = self.0.as_u64_pair();
        (high ^ low) as i64
    }
}
