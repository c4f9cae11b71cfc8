//! Infrastructure layer: event persistence, command dispatch, read models,
//! and the application services exposing the engine's boundary contracts.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent,
    UncommittedEvent,
};
pub use projections::funding::{FundingProgress, FundingRollupProjection};
pub use projections::investments::{InvestmentReadModel, InvestmentsProjection};
pub use projections::listings::{ListingReadModel, ListingsProjection};
pub use read_model::{InMemoryStore, ReadModelStore};
pub use services::{Marketplace, PledgeReceipt, ReconcileOutcome, ServiceError, StartCheckout};
