//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth. This
//! module provides deterministic replay with per-stream cursor tracking,
//! without making storage assumptions.

use std::collections::HashMap;

use plotfund_core::AggregateId;

use crate::{EventEnvelope, Projection};

/// Runs envelopes through a projection and tracks per-stream progress.
///
/// The runner remembers the last applied sequence number for every aggregate
/// stream. A duplicate delivery (same or lower sequence number) is skipped
/// silently; that is the at-least-once contract at work.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursors: HashMap<AggregateId, u64>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursors: HashMap::new(),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Last applied sequence number for a stream (0 if none applied yet).
    pub fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        self.cursors.get(&aggregate_id).copied().unwrap_or(0)
    }

    /// Apply a single envelope, skipping duplicates.
    ///
    /// Returns `true` if the envelope was applied, `false` if it was a
    /// duplicate of something already seen.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> bool {
        let cursor = self.cursors.entry(envelope.aggregate_id()).or_insert(0);
        if envelope.sequence_number() <= *cursor {
            return false;
        }

        self.projection.apply(envelope);
        *cursor = envelope.sequence_number();
        true
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(&mut self, envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>)
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env);
        }
    }

    /// Rebuild a projection from scratch by replaying the full event history.
    ///
    /// The factory is used to create a fresh projection instance.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> P
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes);
        runner.projection
    }
}
