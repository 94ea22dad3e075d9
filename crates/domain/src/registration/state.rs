//! Registration status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RegistrationError;

/// The status of a registration.
///
/// State transitions:
/// ```text
/// Waitlisted ──► Confirmed ──► Cancelled
///      │                          ▲
///      └──────────────────────────┘
/// ```
///
/// The initial status is decided at creation: Confirmed while seats remain,
/// Waitlisted otherwise. Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Holds one of the event's seats.
    Confirmed,

    /// Waiting for a seat; carries a queue position.
    Waitlisted,

    /// Cancelled by the registrant or an operator (terminal state).
    Cancelled,
}

impl RegistrationStatus {
    /// Returns true if the registration counts against the one-active-per-registrant rule.
    pub fn is_active(&self) -> bool {
        !matches!(self, RegistrationStatus::Cancelled)
    }

    /// Returns true if the registration can be promoted to Confirmed.
    pub fn can_promote(&self) -> bool {
        matches!(self, RegistrationStatus::Waitlisted)
    }

    /// Returns true if the registration can be cancelled.
    pub fn can_cancel(&self) -> bool {
        self.is_active()
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationStatus::Cancelled)
    }

    /// Returns the status name as stored and displayed.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Confirmed => "Confirmed",
            RegistrationStatus::Waitlisted => "Waitlisted",
            RegistrationStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Confirmed" => Ok(RegistrationStatus::Confirmed),
            "Waitlisted" => Ok(RegistrationStatus::Waitlisted),
            "Cancelled" => Ok(RegistrationStatus::Cancelled),
            other => Err(RegistrationError::UnknownStatus(other.to_string())),
        }
    }
}
