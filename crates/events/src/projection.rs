use crate::{Event, EventEnvelope};

/// A projection builds a read model from an append-only event stream.
///
/// Projections are the read side of the engine: the listings table, the
/// investments table, and the funding-progress rollup are all projections over
/// listing streams. Read models are **disposable**: events are the source of
/// truth, and any projection can be rebuilt from scratch by replaying them.
///
/// Implementations must be **idempotent**: the bus delivers at least once, so
/// applying the same event twice must not double-count. The
/// [`ProjectionRunner`](crate::ProjectionRunner) helps by tracking per-stream
/// sequence numbers and skipping anything already seen.
///
/// Persistence is out of scope here; a projection may keep its read model in
/// memory, in a database, or anywhere else.
pub trait Projection {
    type Ev: Event;

    /// Apply a single event to the projection, updating the read model.
    ///
    /// Irrelevant events should be ignored rather than treated as errors.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
