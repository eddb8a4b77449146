//! Synchronous event publication.
//!
//! Committed events are handed to a bus after the store append succeeds. The
//! bus is for distribution only; the event store stays the source of truth and
//! every read model can be rebuilt from it.

use std::sync::Arc;

/// Publish side of an event bus.
///
/// Delivery is synchronous: when `publish` returns `Ok`, every consumer has
/// seen the message. Consumers must still be idempotent, since a rebuild
/// replays messages they already applied.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }
}
