//! Registration commands as units of work.

use common::EventId;
use dispatch::EventDispatcher;
use domain::Registration;
use store::RegistrationStore;
use waitlist::{
    Allocation, Cancel, Confirm, IncreaseCapacity, Promote, Register, WaitlistAllocator,
};

use crate::error::Result;

/// Runs an allocator command and then dispatches the events of every
/// registration it changed.
///
/// Dispatch only starts after the command's transaction has committed, so
/// handlers never observe state that could still roll back. The returned
/// registrations are the committed ones, targeted registration first, with
/// their events already drained.
pub struct RegistrationService<S: RegistrationStore> {
    allocator: WaitlistAllocator<S>,
    dispatcher: EventDispatcher,
}

impl<S: RegistrationStore> RegistrationService<S> {
    pub fn new(allocator: WaitlistAllocator<S>, dispatcher: EventDispatcher) -> Self {
        Self {
            allocator,
            dispatcher,
        }
    }

    pub fn allocator(&self) -> &WaitlistAllocator<S> {
        &self.allocator
    }

    pub async fn register(&self, cmd: Register) -> Result<Vec<Registration>> {
        let allocation = self.allocator.register(cmd).await?;
        self.dispatch(allocation).await
    }

    pub async fn cancel(&self, cmd: Cancel) -> Result<Vec<Registration>> {
        let allocation = self.allocator.cancel(cmd).await?;
        self.dispatch(allocation).await
    }

    pub async fn promote(&self, cmd: Promote) -> Result<Vec<Registration>> {
        let allocation = self.allocator.promote(cmd).await?;
        self.dispatch(allocation).await
    }

    pub async fn confirm(&self, cmd: Confirm) -> Result<Vec<Registration>> {
        let allocation = self.allocator.confirm(cmd).await?;
        self.dispatch(allocation).await
    }

    pub async fn increase_capacity(&self, cmd: IncreaseCapacity) -> Result<Vec<Registration>> {
        let allocation = self.allocator.increase_capacity(cmd).await?;
        self.dispatch(allocation).await
    }

    pub async fn registrations(&self, event_id: EventId) -> Result<Vec<Registration>> {
        Ok(self.allocator.registrations(event_id).await?)
    }

    async fn dispatch(&self, allocation: Allocation) -> Result<Vec<Registration>> {
        if allocation.is_noop() {
            return Ok(allocation.into_registrations());
        }

        let mut changed = allocation.into_registrations();
        let report = self.dispatcher.dispatch_and_clear(&mut changed).await?;
        tracing::debug!(?report, "Registration events dispatched");
        Ok(changed)
    }
}
