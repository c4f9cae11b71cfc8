//! Pledge ledger operations.

use chrono::Utc;
use serde::Serialize;

use plotfund_core::{AggregateId, DomainError, UserId};
use plotfund_listings::{
    InvestmentId, ListingCommand, ListingEvent, ListingId, PledgeInvestment, RetractPledge,
};
use plotfund_payments::CheckoutProcessor;

use crate::event_store::EventStore;
use crate::projections::investments::InvestmentReadModel;

use super::{Marketplace, ServiceError};

/// What the caller gets back for a successfully recorded pledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PledgeReceipt {
    pub investment_id: InvestmentId,
    pub expected_return_pence: i64,
    pub expected_total_back_pence: i64,
}

impl<S, P> Marketplace<S, P>
where
    S: EventStore + 'static,
    P: CheckoutProcessor,
{
    /// Record a pledge against an active listing.
    ///
    /// Validation (active, unexpired, not the owner, positive amount, usable
    /// return band) runs inside the listing's stream transaction, so a
    /// concurrent expiry or deactivation between the caller's read and this
    /// call aborts the pledge instead of recording it against a dead listing.
    /// A rejected pledge leaves zero rows.
    pub fn pledge(
        &self,
        listing_id: ListingId,
        investor: UserId,
        amount_pence: i64,
    ) -> Result<PledgeReceipt, ServiceError> {
        // Cheap existence check before touching the stream; an unknown or
        // deleted listing is NotFound, not an internal error.
        if self.listings().get(&listing_id).is_none() {
            return Err(DomainError::not_found().into());
        }

        let investment_id = InvestmentId::new(AggregateId::new());
        let committed = self.dispatch(
            listing_id,
            ListingCommand::PledgeInvestment(PledgeInvestment {
                listing_id,
                investment_id,
                investor,
                amount_pence,
                occurred_at: Utc::now(),
            }),
        )?;

        // The frozen figures come from the committed event, not a recompute.
        let pledged = committed
            .iter()
            .find_map(|stored| {
                match serde_json::from_value::<ListingEvent>(stored.payload.clone()) {
                    Ok(ListingEvent::InvestmentPledged(e)) => Some(e),
                    _ => None,
                }
            })
            .ok_or_else(|| {
                ServiceError::Infrastructure(
                    "pledge dispatch committed no InvestmentPledged event".to_string(),
                )
            })?;

        tracing::info!(
            listing_id = %listing_id,
            investment_id = %investment_id,
            amount_pence,
            "pledge created"
        );

        Ok(PledgeReceipt {
            investment_id,
            expected_return_pence: pledged.expected_return_pence,
            expected_total_back_pence: pledged.expected_total_back_pence,
        })
    }

    /// Retract (cancel) a pledge.
    ///
    /// Allowed only for the pledging investor, only while the pledge is still
    /// Pledged and the listing is still Active and unexpired.
    pub fn retract(
        &self,
        investment_id: InvestmentId,
        investor: UserId,
    ) -> Result<(), ServiceError> {
        // The read model maps the investment back to its listing stream; a
        // foreign investor's pledge is indistinguishable from a missing one.
        let row = self
            .investments()
            .get(&investment_id)
            .filter(|row| row.investor == investor)
            .ok_or(DomainError::NotFound)?;

        self.dispatch(
            row.listing_id,
            ListingCommand::RetractPledge(RetractPledge {
                listing_id: row.listing_id,
                investment_id,
                investor,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(
            listing_id = %row.listing_id,
            investment_id = %investment_id,
            "pledge retracted"
        );
        Ok(())
    }

    /// Investment row for display.
    pub fn investment(&self, investment_id: InvestmentId) -> Option<InvestmentReadModel> {
        self.investments().get(&investment_id)
    }

    /// All of an investor's pledges (dashboard view).
    pub fn investments_for(&self, investor: UserId) -> Vec<InvestmentReadModel> {
        self.investments().list_for_investor(&investor)
    }
}
