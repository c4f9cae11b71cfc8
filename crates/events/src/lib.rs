//! Event abstractions: the `Event` trait, stream envelopes, pub/sub bus,
//! and projection building blocks.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod projection;
pub mod runner;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
pub use projection::Projection;
pub use runner::ProjectionRunner;
