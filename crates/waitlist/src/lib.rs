//! Capacity and waitlist allocation for event registrations.
//!
//! [`WaitlistAllocator`] is the only code path that changes a registration's
//! status, a waitlist position or an event's capacity.

pub mod allocator;
pub mod commands;
pub mod error;

pub use allocator::{Allocation, WaitlistAllocator};
pub use commands::{Cancel, Confirm, IncreaseCapacity, Promote, Register};
pub use error::{Result, WaitlistError};
