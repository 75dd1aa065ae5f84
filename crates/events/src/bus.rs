//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes already-stored events to read models. Delivery is
//! at-least-once, so consumers must be idempotent (projections track a
//! per-stream cursor and skip sequence numbers they have already seen).

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A subscription to an event stream (broadcast: every subscriber gets every message).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Drain every message that is already queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Command → Event Store (append) → Event Bus (publish) → Projections
/// ```
///
/// Events are stored first and published second, so a failed publish never
/// loses data; the store remains the source of truth.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
