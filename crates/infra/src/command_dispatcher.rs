//! Command execution pipeline (application-level orchestration).
//!
//! One pipeline for every listing command:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the listing's stream from the store
//!   ↓
//! 2. Rehydrate the aggregate (apply history)
//!   ↓
//! 3. Handle the command (pure decision logic, produces events)
//!   ↓
//! 4. Append with an optimistic concurrency check
//!   ↓
//! 5. Publish committed events on the bus
//! ```
//!
//! The append expects the exact stream version observed at load time, so two
//! operations racing on the same listing cannot both commit: the loser gets
//! `DispatchError::Concurrency` and is expected to reload and re-decide
//! against fresh state. Combined with decision logic that no-ops on replays,
//! this yields the reconciliation idempotence and pledge/expiry mutual
//! exclusion the engine guarantees.
//!
//! An empty decision (`handle` returns no events) short-circuits: nothing is
//! appended, nothing is published, and the caller can tell "accepted but not
//! applied" apart from an applied change by the emptiness of the result.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use plotfund_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use plotfund_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    Concurrency(String),
    /// Domain validation failure (deterministic).
    Validation(String),
    /// Domain authorization failure.
    Forbidden(String),
    /// Domain-level not found.
    NotFound,
    /// Operation illegal for the aggregate's current lifecycle state.
    InvalidState(String),
    /// Aggregate data is inconsistent (e.g. unusable return band).
    Configuration(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::Forbidden(msg) => DispatchError::Forbidden(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidState(msg) => DispatchError::InvalidState(msg),
            DomainError::Configuration(msg) => DispatchError::Configuration(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the application services and the infrastructure (event store,
/// event bus). Generic over both so tests run against the in-memory pair and
/// production can swap in the Postgres store without touching domain code.
///
/// Guarantees:
/// - events are persisted before publication (append failure publishes nothing)
/// - optimistic concurrency per aggregate stream
/// - deterministic rehydration (history applied in sequence order)
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without dispatching anything.
    ///
    /// This is the authoritative read: services use it where a decision needs
    /// current state (e.g. pricing a checkout) rather than a possibly stale
    /// read model.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// Returns the committed `StoredEvent`s, empty when the command was
    /// accepted but applied nothing (e.g. a replayed payment confirmation).
    /// On `DispatchError::Concurrency` the caller should reload and retry;
    /// every listing command re-validates against fresh state when it does.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: plotfund_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Defense in depth even if a buggy backend returns a foreign stream; also
    // ensure the stream is strictly increasing by sequence number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                format!("loaded stream contains wrong aggregate_id at index {idx}"),
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
