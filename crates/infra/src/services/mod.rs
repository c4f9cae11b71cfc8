//! Application services: the engine's boundary contracts.
//!
//! `Marketplace` composes the command dispatcher, the checkout-processor
//! port, the pricing tariff, and the read-model projections, and exposes
//! every inbound operation the web layer, the payment processor, and the
//! scheduler call:
//!
//! - listing lifecycle: open / save draft / media / delete
//! - checkout: start (with session reuse), cancel, finish (redirect path)
//! - reconciliation: webhook path, idempotent
//! - scheduled: expire due listings
//! - pledge ledger: pledge / retract
//! - reads: listing rows, investment rows, funding progress, return estimates
//!
//! Every mutating operation dispatches a command against the listing's stream
//! and retries a bounded number of times on an optimistic-concurrency
//! conflict; the re-decided command validates against fresh state, so a
//! loser either converges (reconciliation no-op) or aborts cleanly (pledge
//! against a just-expired listing). Committed events are applied to the
//! projections before the call returns, so the engine's own read models are
//! consistent with the operation's outcome.

mod investments;
mod listings;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use plotfund_core::DomainError;
use plotfund_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use plotfund_listings::{
    InvestmentId, LISTING_AGGREGATE_TYPE, Listing, ListingCommand, ListingId, PricingTable,
};
use plotfund_payments::{CheckoutProcessor, ProcessorError};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::funding::FundingRollupProjection;
use crate::projections::investments::{InvestmentReadModel, InvestmentsProjection};
use crate::projections::listings::{ListingReadModel, ListingsProjection};
use crate::read_model::InMemoryStore;

pub use investments::PledgeReceipt;
pub use listings::{ReconcileOutcome, StartCheckout};

/// Boundary-level error for service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Deterministic domain failure; reported to the caller, never retried.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The payment processor could not be reached or rejected a call.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// Storage or publication failure below the domain.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => ServiceError::Domain(DomainError::Conflict(msg)),
            DispatchError::Validation(msg) => ServiceError::Domain(DomainError::Validation(msg)),
            DispatchError::Forbidden(msg) => ServiceError::Domain(DomainError::Forbidden(msg)),
            DispatchError::NotFound => ServiceError::Domain(DomainError::NotFound),
            DispatchError::InvalidState(msg) => {
                ServiceError::Domain(DomainError::InvalidState(msg))
            }
            DispatchError::Configuration(msg) => {
                ServiceError::Domain(DomainError::Configuration(msg))
            }
            DispatchError::Deserialize(msg) => ServiceError::Infrastructure(msg),
            DispatchError::Store(err) => ServiceError::Infrastructure(err.to_string()),
            DispatchError::Publish(msg) => ServiceError::Infrastructure(msg),
        }
    }
}

pub(crate) type JsonEnvelope = EventEnvelope<JsonValue>;
type Bus = InMemoryEventBus<JsonEnvelope>;
type ListingsStore = Arc<InMemoryStore<ListingId, ListingReadModel>>;
type InvestmentsStore = Arc<InMemoryStore<InvestmentId, InvestmentReadModel>>;

/// Bounded retries for optimistic-concurrency conflicts. Conflicts on one
/// listing resolve as soon as the loser reloads, so a handful of attempts is
/// plenty before reporting the conflict to the caller.
const MAX_DISPATCH_ATTEMPTS: u32 = 5;

/// The marketplace engine's application services.
///
/// Generic over the event store (in-memory for tests/dev, Postgres in
/// production) and the checkout processor.
pub struct Marketplace<S, P>
where
    S: EventStore + 'static,
    P: CheckoutProcessor,
{
    dispatcher: CommandDispatcher<Arc<S>, Arc<Bus>>,
    store: Arc<S>,
    bus: Arc<Bus>,
    processor: P,
    pricing: PricingTable,
    listings: ListingsProjection<ListingsStore>,
    investments: InvestmentsProjection<InvestmentsStore>,
    funding: FundingRollupProjection,
}

impl<S, P> Marketplace<S, P>
where
    S: EventStore + 'static,
    P: CheckoutProcessor,
{
    pub fn new(store: S, processor: P, pricing: PricingTable) -> Self {
        let store = Arc::new(store);
        let bus: Arc<Bus> = Arc::new(InMemoryEventBus::new());

        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus.clone()),
            store,
            bus,
            processor,
            pricing,
            listings: ListingsProjection::new(Arc::new(InMemoryStore::new())),
            investments: InvestmentsProjection::new(Arc::new(InMemoryStore::new())),
            funding: FundingRollupProjection::new(),
        }
    }

    /// Subscribe to every event the engine commits (external consumers).
    pub fn subscribe(&self) -> Subscription<JsonEnvelope> {
        self.bus.subscribe()
    }

    /// The underlying event store (source of truth; read models are
    /// disposable views over it).
    pub fn event_store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn listings(&self) -> &ListingsProjection<ListingsStore> {
        &self.listings
    }

    pub fn investments(&self) -> &InvestmentsProjection<InvestmentsStore> {
        &self.investments
    }

    /// The outbound checkout-processor port handle.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub(crate) fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub(crate) fn funding(&self) -> &FundingRollupProjection {
        &self.funding
    }

    /// Authoritative read of a listing's current state from its stream.
    pub(crate) fn load_listing(&self, listing_id: ListingId) -> Result<Listing, ServiceError> {
        Ok(self
            .dispatcher
            .load(listing_id.0, |id| Listing::empty(ListingId::new(id)))?)
    }

    /// Dispatch a listing command with bounded concurrency retries, then feed
    /// the committed events straight into the read models.
    pub(crate) fn dispatch(
        &self,
        listing_id: ListingId,
        command: ListingCommand,
    ) -> Result<Vec<StoredEvent>, ServiceError> {
        let mut attempt = 1;
        let committed = loop {
            match self.dispatcher.dispatch::<Listing>(
                listing_id.0,
                LISTING_AGGREGATE_TYPE,
                command.clone(),
                |id| Listing::empty(ListingId::new(id)),
            ) {
                Ok(events) => break events,
                Err(DispatchError::Concurrency(msg)) if attempt < MAX_DISPATCH_ATTEMPTS => {
                    tracing::debug!(
                        listing_id = %listing_id,
                        attempt,
                        "concurrent write on listing stream, retrying: {msg}"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.project(&committed);
        Ok(committed)
    }

    /// Apply committed events to the projections synchronously.
    ///
    /// The per-stream cursors make this idempotent against the same events
    /// arriving again through a bus subscriber or a rebuild.
    pub(crate) fn project(&self, committed: &[StoredEvent]) {
        for stored in committed {
            let envelope = stored.to_envelope();
            for result in [
                self.listings.apply_envelope(&envelope),
                self.investments.apply_envelope(&envelope),
                self.funding.apply_envelope(&envelope),
            ] {
                if let Err(err) = result {
                    tracing::warn!(
                        event_type = %stored.event_type,
                        "projection apply failed: {err}"
                    );
                }
            }
        }
    }
}
