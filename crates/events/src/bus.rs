//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport layer** for events after they have been
//! persisted to the event store:
//!
//! ```text
//! Command → Event Store (append) → Event Bus (publish) → Consumers
//!                                                           ├─ Projections
//!                                                           └─ Workers
//! ```
//!
//! Delivery is **at-least-once** and the bus holds no state: the event store
//! stays the source of truth, so consumers must be idempotent and can always
//! be rebuilt by replaying the store.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published to the bus
/// (broadcast semantics). Subscriptions are designed for single-threaded
/// consumption; use one per worker.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// The contract is deliberately light: no transport assumptions, no storage
/// assumptions, broadcast fan-out. `publish` failures are surfaced to the
/// caller (typically the command dispatcher); since events are already
/// persisted by then, retrying publication is safe.
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
