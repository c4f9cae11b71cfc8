//! Read model storage abstractions for disposable projections.

pub mod store;

pub use store::{InMemoryStore, ReadModelStore};
