//! Funding-progress rollup.
//!
//! Tracks the pledged total per listing from pledge events alone; the target
//! comes from the listing's funding band at query time. Division by an
//! unknown or zero target reports 0%, never an error.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;

use plotfund_core::AggregateId;
use plotfund_events::{EventEnvelope, Projection};
use plotfund_listings::{
    FundingBand, InvestmentId, LISTING_AGGREGATE_TYPE, ListingEvent, ListingId,
};

use super::ProjectionApplyError;

/// Presentation rollup for one listing's funding progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FundingProgress {
    pub pledged_pence: i64,
    /// Unknown when the listing has no funding band.
    pub target_pence: Option<i64>,
    pub remaining_pence: Option<i64>,
    /// Truncated integer percent, clamped to 0..=100.
    pub progress_pct: u8,
}

impl FundingProgress {
    /// Compute the display figures for a pledged total against a band.
    pub fn compute(pledged_pence: i64, funding_band: Option<FundingBand>) -> Self {
        let pledged = pledged_pence.max(0);
        match funding_band.map(|band| band.target_pence()).filter(|t| *t > 0) {
            None => Self {
                pledged_pence: pledged,
                target_pence: None,
                remaining_pence: None,
                progress_pct: 0,
            },
            Some(target) => {
                let pct = (pledged.saturating_mul(100) / target).clamp(0, 100) as u8;
                Self {
                    pledged_pence: pledged,
                    target_pence: Some(target),
                    remaining_pence: Some((target - pledged).max(0)),
                    progress_pct: pct,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PledgeEntry {
    listing_id: ListingId,
    amount_pence: i64,
    counted: bool,
}

/// Pledged-total rollup per listing.
///
/// Mutation comes exclusively from pledge events; listing deletion drops the
/// rollup row (a draft cannot carry live pledges).
#[derive(Debug, Default)]
pub struct FundingRollupProjection {
    pledged: RwLock<HashMap<ListingId, i64>>,
    entries: RwLock<HashMap<InvestmentId, PledgeEntry>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl FundingRollupProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all currently Pledged amounts for a listing.
    pub fn pledged_pence(&self, listing_id: &ListingId) -> i64 {
        match self.pledged.read() {
            Ok(map) => map.get(listing_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
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
                if let (Ok(mut pledged), Ok(mut entries)) =
                    (self.pledged.write(), self.entries.write())
                {
                    entries.insert(
                        e.investment_id,
                        PledgeEntry {
                            listing_id: e.listing_id,
                            amount_pence: e.amount_pence,
                            counted: true,
                        },
                    );
                    *pledged.entry(e.listing_id).or_insert(0) += e.amount_pence;
                }
            }
            ListingEvent::PledgeRetracted(e) => {
                if let (Ok(mut pledged), Ok(mut entries)) =
                    (self.pledged.write(), self.entries.write())
                {
                    if let Some(entry) = entries.get_mut(&e.investment_id) {
                        if entry.counted {
                            entry.counted = false;
                            if let Some(total) = pledged.get_mut(&entry.listing_id) {
                                *total -= entry.amount_pence;
                            }
                        }
                    }
                }
            }
            ListingEvent::ListingDeleted(e) => {
                if let (Ok(mut pledged), Ok(mut entries)) =
                    (self.pledged.write(), self.entries.write())
                {
                    pledged.remove(&e.listing_id);
                    entries.retain(|_, entry| entry.listing_id != e.listing_id);
                }
            }
            _ => {}
        }
    }
}

impl Projection for FundingRollupProjection {
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
    use chrono::Utc;
    use plotfund_core::UserId;
    use plotfund_listings::{InvestmentPledged, PledgeRetracted};

    fn pledge_event(listing_id: ListingId, investment_id: InvestmentId, amount: i64) -> ListingEvent {
        ListingEvent::InvestmentPledged(InvestmentPledged {
            listing_id,
            investment_id,
            investor: UserId::new(),
            amount_pence: amount,
            expected_return_pence: 0,
            expected_total_back_pence: amount,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn pledges_accumulate_and_retractions_subtract() {
        let rollup = FundingRollupProjection::new();
        let listing_id = ListingId::new(AggregateId::new());
        let first = InvestmentId::new(AggregateId::new());
        let second = InvestmentId::new(AggregateId::new());

        rollup.apply_typed(listing_id.0, 3, &pledge_event(listing_id, first, 100_000));
        rollup.apply_typed(listing_id.0, 4, &pledge_event(listing_id, second, 250_000));
        assert_eq!(rollup.pledged_pence(&listing_id), 350_000);

        rollup.apply_typed(
            listing_id.0,
            5,
            &ListingEvent::PledgeRetracted(PledgeRetracted {
                listing_id,
                investment_id: first,
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(rollup.pledged_pence(&listing_id), 250_000);

        // Replayed retraction must not subtract twice.
        rollup.apply_typed(
            listing_id.0,
            5,
            &ListingEvent::PledgeRetracted(PledgeRetracted {
                listing_id,
                investment_id: first,
                occurred_at: Utc::now(),
            }),
        );
        assert_eq!(rollup.pledged_pence(&listing_id), 250_000);
    }

    #[test]
    fn progress_reports_zero_for_an_unknown_target() {
        let progress = FundingProgress::compute(123_456, None);
        assert_eq!(progress.pledged_pence, 123_456);
        assert_eq!(progress.target_pence, None);
        assert_eq!(progress.remaining_pence, None);
        assert_eq!(progress.progress_pct, 0);
    }

    #[test]
    fn progress_truncates_and_clamps() {
        // £10,000–£20,000 band: target £20,000 = 2,000,000 pence.
        let band = Some(FundingBand::B10kTo20k);

        let half = FundingProgress::compute(999_999, band);
        assert_eq!(half.progress_pct, 49); // truncated, not rounded
        assert_eq!(half.remaining_pence, Some(1_000_001));

        let over = FundingProgress::compute(3_000_000, band);
        assert_eq!(over.progress_pct, 100);
        assert_eq!(over.remaining_pence, Some(0));
    }
}
