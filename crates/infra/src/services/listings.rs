//! Listing lifecycle, checkout, reconciliation, and read-side operations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use plotfund_core::{AggregateId, DomainError, ReturnEstimate, UserId};
use plotfund_listings::{
    AttachMedia, CancelCheckout, ConfirmPayment, DeleteListing, DraftPatch, ExpireListing,
    ListingCommand, ListingId, ListingStatus, MediaId, MediaKind, OpenListing,
    RecordCheckoutSession, SaveDraft,
};
use plotfund_payments::{
    CheckoutProcessor, CheckoutRequest, PaymentConfirmation, SessionStatus,
};

use crate::event_store::EventStore;
use crate::projections::funding::FundingProgress;
use crate::projections::listings::ListingReadModel;

use super::{Marketplace, ServiceError};

/// Result of the webhook/redirect reconciliation paths.
///
/// `applied: false` covers every silently-ignored precondition (replays,
/// stale sessions, mismatched amounts); the processor still gets a
/// success-class acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub applied: bool,
}

/// Outcome of `start_checkout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartCheckout {
    /// Send the owner to the processor (fresh or reused open session).
    Redirect {
        session_id: String,
        redirect_url: String,
    },
    /// The recorded session had already completed and reconciliation applied;
    /// no fee is due.
    AlreadyActive,
}

impl<S, P> Marketplace<S, P>
where
    S: EventStore + 'static,
    P: CheckoutProcessor,
{
    /// Open a new draft listing for `owner`.
    pub fn open_listing(&self, owner: UserId) -> Result<ListingId, ServiceError> {
        let listing_id = ListingId::new(AggregateId::new());
        self.dispatch(
            listing_id,
            ListingCommand::OpenListing(OpenListing {
                listing_id,
                owner,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(listing_id)
    }

    /// Save a draft's full editable field set. Resets any payment correlation.
    pub fn save_draft(
        &self,
        listing_id: ListingId,
        owner: UserId,
        patch: DraftPatch,
    ) -> Result<(), ServiceError> {
        self.dispatch(
            listing_id,
            ListingCommand::SaveDraft(SaveDraft {
                listing_id,
                owner,
                patch,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn attach_media(
        &self,
        listing_id: ListingId,
        owner: UserId,
        kind: MediaKind,
        filename: impl Into<String>,
    ) -> Result<MediaId, ServiceError> {
        let media_id = MediaId::new(AggregateId::new());
        self.dispatch(
            listing_id,
            ListingCommand::AttachMedia(AttachMedia {
                listing_id,
                owner,
                media_id,
                kind,
                filename: filename.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(media_id)
    }

    pub fn remove_media(
        &self,
        listing_id: ListingId,
        owner: UserId,
        media_id: MediaId,
    ) -> Result<(), ServiceError> {
        self.dispatch(
            listing_id,
            ListingCommand::RemoveMedia(plotfund_listings::RemoveMedia {
                listing_id,
                owner,
                media_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Delete a draft listing. Projections drop its rows.
    pub fn delete_listing(&self, listing_id: ListingId, owner: UserId) -> Result<(), ServiceError> {
        self.dispatch(
            listing_id,
            ListingCommand::DeleteListing(DeleteListing {
                listing_id,
                owner,
                occurred_at: Utc::now(),
            }),
        )?;
        tracing::info!(listing_id = %listing_id, "draft listing deleted");
        Ok(())
    }

    /// Start (or resume) the activation fee checkout for a ready draft.
    ///
    /// If the listing already references a session at the processor, that
    /// session is reused when still open, and reconciled immediately when
    /// already complete; a fee must never be collectable twice. Only
    /// otherwise is a new session created and correlated.
    pub fn start_checkout(
        &self,
        listing_id: ListingId,
        owner: UserId,
    ) -> Result<StartCheckout, ServiceError> {
        let listing = self.load_listing(listing_id)?;

        if listing.owner() != Some(owner) || listing.is_deleted() {
            return Err(DomainError::not_found().into());
        }
        if listing.status() != ListingStatus::Draft {
            return Err(DomainError::invalid_state("only draft listings can be paid for").into());
        }
        if !listing.is_ready_for_activation() {
            return Err(DomainError::invalid_state(
                "complete all steps (including at least one upload) before activating",
            )
            .into());
        }

        // Reused-session short-circuit.
        if let Some(session_id) = listing.checkout_session_id() {
            let state = self.processor().retrieve_session(session_id)?;
            match state.status {
                SessionStatus::Open => {
                    if let Some(redirect_url) = state.redirect_url {
                        tracing::debug!(listing_id = %listing_id, "reusing open checkout session");
                        return Ok(StartCheckout::Redirect {
                            session_id: state.session_id,
                            redirect_url,
                        });
                    }
                }
                SessionStatus::Complete => {
                    let outcome = self.reconcile_payment(listing_id, state.confirmation())?;
                    if outcome.applied {
                        return Ok(StartCheckout::AlreadyActive);
                    }
                    // Complete but not applicable (e.g. tampered amount):
                    // fall through to a fresh session.
                }
                SessionStatus::Expired => {}
            }
        }

        let fee_pence = self
            .pricing()
            .price_for_activation(listing.funding_band(), listing.duration_days())?;

        let session = self.processor().create_checkout_session(CheckoutRequest {
            amount_pence: fee_pence,
            correlation_id: listing_id.0,
        })?;

        self.dispatch(
            listing_id,
            ListingCommand::RecordCheckoutSession(RecordCheckoutSession {
                listing_id,
                owner,
                session_id: session.session_id.clone(),
                expected_amount_pence: fee_pence,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(
            listing_id = %listing_id,
            session_id = %session.session_id,
            fee_pence,
            "checkout session created"
        );

        Ok(StartCheckout::Redirect {
            session_id: session.session_id,
            redirect_url: session.redirect_url,
        })
    }

    /// The owner backed out of checkout; drop the correlation, keep the draft.
    pub fn cancel_checkout(&self, listing_id: ListingId, owner: UserId) -> Result<(), ServiceError> {
        self.dispatch(
            listing_id,
            ListingCommand::CancelCheckout(CancelCheckout {
                listing_id,
                owner,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Redirect path: the payer came back, eagerly re-verify with the
    /// processor and reconcile. Converges on the same command as the webhook.
    pub fn finish_checkout(
        &self,
        listing_id: ListingId,
        session_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let state = self.processor().retrieve_session(session_id)?;
        self.reconcile_payment(listing_id, state.confirmation())
    }

    /// Webhook path: consume a pushed payment confirmation.
    ///
    /// Idempotent: replays and out-of-order deliveries return
    /// `applied: false` without raising, so the processor always receives a
    /// success-class acknowledgment for a well-formed notification.
    pub fn reconcile_payment(
        &self,
        listing_id: ListingId,
        confirmation: PaymentConfirmation,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let committed = self.dispatch(
            listing_id,
            ListingCommand::ConfirmPayment(ConfirmPayment {
                listing_id,
                confirmation,
                occurred_at: Utc::now(),
            }),
        )?;

        let applied = !committed.is_empty();
        if applied {
            tracing::info!(listing_id = %listing_id, "listing activated from paid confirmation");
        } else {
            tracing::debug!(listing_id = %listing_id, "payment confirmation not applied");
        }

        Ok(ReconcileOutcome { applied })
    }

    /// Scheduled sweep: expire every Active listing whose window has passed.
    ///
    /// Each listing is expired under its own stream's concurrency control, so
    /// the sweep cannot race destructively with a pledge: whichever commits
    /// first wins, and the loser re-decides against the updated state.
    /// Returns the number of listings actually transitioned.
    pub fn expire_due_listings(&self, now: DateTime<Utc>) -> usize {
        let due = self.listings().due_for_expiry(now);
        let mut expired = 0;

        for listing_id in due {
            match self.dispatch(
                listing_id,
                ListingCommand::ExpireListing(ExpireListing {
                    listing_id,
                    occurred_at: now,
                }),
            ) {
                Ok(committed) if !committed.is_empty() => expired += 1,
                Ok(_) => {}
                Err(err) => {
                    // One stubborn listing must not stall the sweep.
                    tracing::warn!(listing_id = %listing_id, "expiry sweep skipped listing: {err}");
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, "expiry sweep transitioned listings");
        }
        expired
    }

    /// Listing row for display.
    pub fn listing(&self, listing_id: ListingId) -> Option<ListingReadModel> {
        self.listings().get(&listing_id)
    }

    /// Funding progress rollup for display. Never fails on band problems;
    /// an unknown target reports 0%.
    pub fn progress(&self, listing_id: ListingId) -> Result<FundingProgress, ServiceError> {
        let row = self
            .listings()
            .get(&listing_id)
            .ok_or(DomainError::NotFound)?;
        Ok(FundingProgress::compute(
            self.funding().pledged_pence(&listing_id),
            row.funding_band,
        ))
    }

    /// Best/worst-case return preview for an amount against an active
    /// listing's band.
    pub fn estimate_return(
        &self,
        listing_id: ListingId,
        amount_pence: i64,
    ) -> Result<ReturnEstimate, ServiceError> {
        let row = self
            .listings()
            .get(&listing_id)
            .filter(|l| l.status == ListingStatus::Active)
            .ok_or(DomainError::NotFound)?;

        if amount_pence <= 0 {
            return Err(DomainError::validation("amount must be greater than 0").into());
        }
        let band = row.return_band.ok_or_else(|| {
            DomainError::configuration("return band is not configured correctly")
        })?;

        let (min_pct, max_pct) = band.range();
        Ok(ReturnEstimate::for_range(amount_pence, min_pct, max_pct))
    }
}
