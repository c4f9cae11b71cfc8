//! Investments read model: one row per pledge.
//!
//! This is the queryable "Investments table": dashboards list it, and the
//! retract path uses it to find which listing stream owns an investment.
//! Rows are never physically deleted by retraction (status flips to
//! Cancelled); only the deletion of a draft listing cascades its rows away.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plotfund_core::{AggregateId, UserId};
use plotfund_events::{EventEnvelope, Projection};
use plotfund_listings::{
    InvestmentId, LISTING_AGGREGATE_TYPE, ListingEvent, ListingId, PledgeStatus,
};

use crate::read_model::ReadModelStore;

use super::ProjectionApplyError;

/// Read model: one investment (pledge) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestmentReadModel {
    pub investment_id: InvestmentId,
    pub listing_id: ListingId,
    pub investor: UserId,
    pub amount_pence: i64,
    pub expected_return_pence: i64,
    pub expected_total_back_pence: i64,
    pub status: PledgeStatus,
    pub created_at: DateTime<Utc>,
}

/// Investments projection. Rebuildable from listing streams.
#[derive(Debug)]
pub struct InvestmentsProjection<S>
where
    S: ReadModelStore<InvestmentId, InvestmentReadModel>,
{
    store: S,
    /// listing → its investment ids, for the delete cascade.
    by_listing: RwLock<HashMap<ListingId, Vec<InvestmentId>>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> InvestmentsProjection<S>
where
    S: ReadModelStore<InvestmentId, InvestmentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            by_listing: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, investment_id: &InvestmentId) -> Option<InvestmentReadModel> {
        self.store.get(investment_id)
    }

    pub fn list_for_listing(&self, listing_id: &ListingId) -> Vec<InvestmentReadModel> {
        let ids = match self.by_listing.read() {
            Ok(map) => map.get(listing_id).cloned().unwrap_or_default(),
            Err(_) => return vec![],
        };
        ids.iter().filter_map(|id| self.store.get(id)).collect()
    }

    pub fn list_for_investor(&self, investor: &UserId) -> Vec<InvestmentReadModel> {
        self.store
            .list()
            .into_iter()
            .filter(|row| &row.investor == investor)
            .collect()
    }

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
            ListingEvent::InvestmentPledged(e) => {
                self.store.upsert(
                    e.investment_id,
                    InvestmentReadModel {
                        investment_id: e.investment_id,
                        listing_id: e.listing_id,
                        investor: e.investor,
                        amount_pence: e.amount_pence,
                        expected_return_pence: e.expected_return_pence,
                        expected_total_back_pence: e.expected_total_back_pence,
                        status: PledgeStatus::Pledged,
                        created_at: e.occurred_at,
                    },
                );
                if let Ok(mut map) = self.by_listing.write() {
                    map.entry(e.listing_id).or_default().push(e.investment_id);
                }
            }
            ListingEvent::PledgeRetracted(e) => {
                if let Some(mut row) = self.store.get(&e.investment_id) {
                    row.status = PledgeStatus::Cancelled;
                    self.store.upsert(e.investment_id, row);
                }
            }
            ListingEvent::ListingDeleted(e) => {
                // Deletion is only possible while Draft, so in practice there
                // are no rows to cascade; this keeps the read model honest if
                // history says otherwise.
                if let Ok(mut map) = self.by_listing.write() {
                    for id in map.remove(&e.listing_id).unwrap_or_default() {
                        self.store.remove(&id);
                    }
                }
            }
            _ => {}
        }
    }
}

impl<S> Projection for InvestmentsProjection<S>
where
    S: ReadModelStore<InvestmentId, InvestmentReadModel>,
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
    use plotfund_listings::{InvestmentPledged, PledgeRetracted};

    fn projection() -> InvestmentsProjection<InMemoryStore<InvestmentId, InvestmentReadModel>> {
        InvestmentsProjection::new(InMemoryStore::new())
    }

    fn pledged(
        listing_id: ListingId,
        investment_id: InvestmentId,
        investor: UserId,
        amount: i64,
    ) -> ListingEvent {
        ListingEvent::InvestmentPledged(InvestmentPledged {
            listing_id,
            investment_id,
            investor,
            amount_pence: amount,
            expected_return_pence: amount * 7 / 100,
            expected_total_back_pence: amount + amount * 7 / 100,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn pledge_rows_are_queryable_by_listing_and_investor() {
        let projection = projection();
        let listing_id = ListingId::new(AggregateId::new());
        let investor = UserId::new();
        let investment_id = InvestmentId::new(AggregateId::new());

        projection.apply_typed(listing_id.0, 3, &pledged(listing_id, investment_id, investor, 10_000));

        let row = projection.get(&investment_id).unwrap();
        assert_eq!(row.status, PledgeStatus::Pledged);
        assert_eq!(row.expected_total_back_pence, 10_700);
        assert_eq!(projection.list_for_listing(&listing_id).len(), 1);
        assert_eq!(projection.list_for_investor(&investor).len(), 1);
    }

    #[test]
    fn retraction_flips_status_without_deleting_the_row() {
        let projection = projection();
        let listing_id = ListingId::new(AggregateId::new());
        let investment_id = InvestmentId::new(AggregateId::new());

        projection.apply_typed(
            listing_id.0,
            3,
            &pledged(listing_id, investment_id, UserId::new(), 5_000),
        );
        projection.apply_typed(
            listing_id.0,
            4,
            &ListingEvent::PledgeRetracted(PledgeRetracted {
                listing_id,
                investment_id,
                occurred_at: Utc::now(),
            }),
        );

        let row = projection.get(&investment_id).unwrap();
        assert_eq!(row.status, PledgeStatus::Cancelled);
        assert_eq!(projection.list_for_listing(&listing_id).len(), 1);
    }
}
