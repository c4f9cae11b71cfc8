//! Listings read model.
//!
//! One row per listing: lifecycle status, descriptive fields, payment
//! correlation, and the active window. The expiry sweep and the read-side
//! service calls are served from here; authoritative decisions re-read the
//! stream instead.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plotfund_core::{AggregateId, UserId};
use plotfund_events::{EventEnvelope, Projection};
use plotfund_listings::{
    CompletionSteps, Country, FundingBand, LISTING_AGGREGATE_TYPE, ListingEvent, ListingId,
    ListingStatus, ReturnBand, ReturnType, UseType,
};

use crate::read_model::ReadModelStore;

use super::ProjectionApplyError;

/// Read model: one listing row.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingReadModel {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub status: ListingStatus,

    pub project_name: Option<String>,
    pub source_use: Option<UseType>,
    pub target_use: Option<UseType>,
    pub country: Option<Country>,
    pub county: Option<String>,
    pub postcode_prefix: Option<String>,
    pub funding_band: Option<FundingBand>,
    pub return_type: Option<ReturnType>,
    pub return_band: Option<ReturnBand>,
    pub duration_days: Option<u32>,
    pub project_duration_days: Option<u32>,

    pub media_count: u32,

    pub expected_amount_pence: i64,
    pub checkout_session_id: Option<String>,
    pub paid_amount_pence: i64,
    pub paid_at: Option<DateTime<Utc>>,

    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl ListingReadModel {
    fn new(listing_id: ListingId, owner: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            listing_id,
            owner,
            status: ListingStatus::Draft,
            project_name: None,
            source_use: None,
            target_use: None,
            country: None,
            county: None,
            postcode_prefix: None,
            funding_band: None,
            return_type: None,
            return_band: None,
            duration_days: None,
            project_duration_days: None,
            media_count: 0,
            expected_amount_pence: 0,
            checkout_session_id: None,
            paid_amount_pence: 0,
            paid_at: None,
            active_from: None,
            active_until: None,
            created_at,
        }
    }

    fn reset_payment_correlation(&mut self) {
        self.expected_amount_pence = 0;
        self.checkout_session_id = None;
        self.paid_amount_pence = 0;
        self.paid_at = None;
    }

    /// Dashboard step breakdown, mirroring the aggregate's readiness gate.
    pub fn completion_steps(&self) -> CompletionSteps {
        CompletionSteps {
            project_details: self.project_duration_days.is_some(),
            project_type: self.source_use.is_some() && self.target_use.is_some(),
            funding_and_returns: self.funding_band.is_some()
                && self.return_type.is_some()
                && self.return_band.is_some()
                && self.duration_days.is_some(),
            location: self.country.is_some()
                && self.county.is_some()
                && self.postcode_prefix.is_some(),
            uploads: self.media_count > 0,
            activated: self.status == ListingStatus::Active,
        }
    }
}

/// Listings projection. Rebuildable from listing streams.
#[derive(Debug)]
pub struct ListingsProjection<S>
where
    S: ReadModelStore<ListingId, ListingReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> ListingsProjection<S>
where
    S: ReadModelStore<ListingId, ListingReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, listing_id: &ListingId) -> Option<ListingReadModel> {
        self.store.get(listing_id)
    }

    pub fn list(&self) -> Vec<ListingReadModel> {
        self.store.list()
    }

    /// Active listings whose window has passed at `now` (sweep input).
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Vec<ListingId> {
        self.store
            .list()
            .into_iter()
            .filter(|l| {
                l.status == ListingStatus::Active
                    && l.active_until.is_some_and(|until| until <= now)
            })
            .map(|l| l.listing_id)
            .collect()
    }

    /// Apply a bus envelope (JSON payload), skipping foreign aggregate types
    /// and already-seen sequence numbers.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionApplyError> {
        if envelope.aggregate_type() != LISTING_AGGREGATE_TYPE {
            return Ok(());
        }
        let event: ListingEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionApplyError::Deserialize(e.to_string()))?;
        self.apply_typed(envelope.aggregate_id(), envelope.sequence_number(), &event);
        Ok(())
    }

    /// Typed application with the per-stream idempotence guard.
    pub fn apply_typed(&self, aggregate_id: AggregateId, sequence_number: u64, event: &ListingEvent) {
        {
            let mut cursors = match self.cursors.write() {
                Ok(c) => c,
                Err(_) => return,
            };
            let cursor = cursors.entry(aggregate_id).or_insert(0);
            if sequence_number <= *cursor {
                return;
            }
            *cursor = sequence_number;
        }

        match event {
            ListingEvent::ListingOpened(e) => {
                self.store.upsert(
                    e.listing_id,
                    ListingReadModel::new(e.listing_id, e.owner, e.occurred_at),
                );
            }
            ListingEvent::DraftSaved(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    let patch = &e.patch;
                    row.project_name = patch.project_name.clone();
                    row.source_use = patch.source_use;
                    row.target_use = patch.target_use;
                    row.country = patch.country;
                    row.county = patch.county.clone();
                    row.postcode_prefix = patch.postcode_prefix.clone();
                    row.funding_band = patch.funding_band;
                    row.return_type = patch.return_type;
                    row.return_band = patch.return_band;
                    row.duration_days = patch.duration_days;
                    row.project_duration_days = patch.project_duration_days;
                    row.reset_payment_correlation();
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::MediaAttached(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.media_count += 1;
                    row.reset_payment_correlation();
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::MediaRemoved(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.media_count = row.media_count.saturating_sub(1);
                    row.reset_payment_correlation();
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::CheckoutSessionRecorded(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.expected_amount_pence = e.expected_amount_pence;
                    row.checkout_session_id = Some(e.session_id.clone());
                    row.paid_amount_pence = 0;
                    row.paid_at = None;
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::CheckoutCancelled(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.reset_payment_correlation();
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::PaymentConfirmed(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.paid_amount_pence = e.amount_pence;
                    row.paid_at = Some(e.occurred_at);
                    row.status = ListingStatus::Active;
                    row.active_from = Some(e.active_from);
                    row.active_until = Some(e.active_until);
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::ListingExpired(e) => {
                if let Some(mut row) = self.store.get(&e.listing_id) {
                    row.status = ListingStatus::Expired;
                    self.store.upsert(e.listing_id, row);
                }
            }
            ListingEvent::ListingDeleted(e) => {
                self.store.remove(&e.listing_id);
            }
            // Pledge events live in the investments/funding read models.
            ListingEvent::InvestmentPledged(_) | ListingEvent::PledgeRetracted(_) => {}
        }
    }
}

impl<S> Projection for ListingsProjection<S>
where
    S: ReadModelStore<ListingId, ListingReadModel>,
{
    type Ev = ListingEvent;

    fn apply(&mut self, envelope: &EventEnvelope<ListingEvent>) {
        self.apply_typed(
            envelope.aggregate_id(),
            envelope.sequence_number(),
            envelope.payload(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryStore;
    use chrono::Duration;
    use plotfund_listings::{DraftPatch, ListingOpened, PaymentConfirmed};

    fn projection() -> ListingsProjection<InMemoryStore<ListingId, ListingReadModel>> {
        ListingsProjection::new(InMemoryStore::new())
    }

    fn listing_id() -> ListingId {
        ListingId::new(AggregateId::new())
    }

    #[test]
    fn opened_listing_appears_as_a_draft_row() {
        let projection = projection();
        let id = listing_id();
        let owner = UserId::new();
        let now = Utc::now();

        projection.apply_typed(
            id.0,
            1,
            &ListingEvent::ListingOpened(ListingOpened {
                listing_id: id,
                owner,
                occurred_at: now,
            }),
        );

        let row = projection.get(&id).unwrap();
        assert_eq!(row.status, ListingStatus::Draft);
        assert_eq!(row.owner, owner);
        assert!(!row.completion_steps().uploads);
    }

    #[test]
    fn duplicate_sequence_numbers_are_skipped() {
        let projection = projection();
        let id = listing_id();
        let now = Utc::now();

        let opened = ListingEvent::ListingOpened(ListingOpened {
            listing_id: id,
            owner: UserId::new(),
            occurred_at: now,
        });
        projection.apply_typed(id.0, 1, &opened);

        // A duplicate delivery of seq 2 must not double-apply.
        let saved = ListingEvent::DraftSaved(plotfund_listings::DraftSaved {
            listing_id: id,
            patch: DraftPatch {
                duration_days: Some(30),
                ..DraftPatch::default()
            },
            occurred_at: now,
        });
        projection.apply_typed(id.0, 2, &saved);
        let media = ListingEvent::MediaAttached(plotfund_listings::MediaAttached {
            listing_id: id,
            media_id: plotfund_listings::MediaId::new(AggregateId::new()),
            kind: plotfund_listings::MediaKind::Image,
            filename: "a.jpg".to_string(),
            occurred_at: now,
        });
        projection.apply_typed(id.0, 2, &media);

        let row = projection.get(&id).unwrap();
        assert_eq!(row.duration_days, Some(30));
        assert_eq!(row.media_count, 0);
    }

    #[test]
    fn due_for_expiry_only_returns_past_window_active_rows() {
        let projection = projection();
        let now = Utc::now();

        let expired_id = listing_id();
        projection.apply_typed(
            expired_id.0,
            1,
            &ListingEvent::ListingOpened(ListingOpened {
                listing_id: expired_id,
                owner: UserId::new(),
                occurred_at: now - Duration::days(40),
            }),
        );
        projection.apply_typed(
            expired_id.0,
            2,
            &ListingEvent::PaymentConfirmed(PaymentConfirmed {
                listing_id: expired_id,
                session_id: "cs_1".to_string(),
                amount_pence: 2_498,
                payment_intent_id: None,
                active_from: now - Duration::days(40),
                active_until: now - Duration::days(10),
                occurred_at: now - Duration::days(40),
            }),
        );

        let live_id = listing_id();
        projection.apply_typed(
            live_id.0,
            1,
            &ListingEvent::ListingOpened(ListingOpened {
                listing_id: live_id,
                owner: UserId::new(),
                occurred_at: now,
            }),
        );
        projection.apply_typed(
            live_id.0,
            2,
            &ListingEvent::PaymentConfirmed(PaymentConfirmed {
                listing_id: live_id,
                session_id: "cs_2".to_string(),
                amount_pence: 2_498,
                payment_intent_id: None,
                active_from: now,
                active_until: now + Duration::days(30),
                occurred_at: now,
            }),
        );

        let due = projection.due_for_expiry(now);
        assert_eq!(due, vec![expired_id]);
    }
}
