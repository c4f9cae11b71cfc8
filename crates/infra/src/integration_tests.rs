//! End-to-end tests over the application services: full activation flows,
//! reconciliation idempotence, and the concurrency scenarios that the
//! per-listing stream serialization must survive.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use plotfund_core::{DomainError, UserId};
use plotfund_events::{EventEnvelope, ProjectionRunner};
use plotfund_listings::{
    Country, DraftPatch, FundingBand, ListingEvent, ListingId, ListingStatus, MediaKind,
    PledgeStatus, PricingTable, ReturnBand, ReturnType, UseType,
};
use plotfund_payments::{CheckoutProcessor, InMemoryProcessor, ProcessorError};

use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::listings::ListingsProjection;
use crate::read_model::InMemoryStore;
use crate::services::{Marketplace, ServiceError, StartCheckout};

type TestMarketplace = Marketplace<InMemoryEventStore, InMemoryProcessor>;

fn marketplace() -> TestMarketplace {
    Marketplace::new(
        InMemoryEventStore::new(),
        InMemoryProcessor::new(),
        PricingTable::default(),
    )
}

fn full_patch() -> DraftPatch {
    DraftPatch {
        project_name: Some("Old Police Station".to_string()),
        source_use: Some(UseType::Commercial),
        target_use: Some(UseType::Residential),
        country: Some(Country::England),
        county: Some("Kent".to_string()),
        postcode_prefix: Some("CT".to_string()),
        funding_band: Some(FundingBand::B10kTo20k),
        return_type: Some(ReturnType::FinancialPayback),
        return_band: Some(ReturnBand::R5To9),
        duration_days: Some(30),
        project_duration_days: Some(365),
    }
}

/// £10k–£20k band + 30 days from the production tariff.
const EXPECTED_FEE: i64 = 1_999 + 1_299;

fn ready_listing(m: &TestMarketplace) -> (ListingId, UserId) {
    let owner = UserId::new();
    let listing_id = m.open_listing(owner).unwrap();
    m.save_draft(listing_id, owner, full_patch()).unwrap();
    m.attach_media(listing_id, owner, MediaKind::Image, "front.jpg")
        .unwrap();
    (listing_id, owner)
}

/// Ready listing taken through checkout + paid confirmation.
fn activated_listing(m: &TestMarketplace) -> (ListingId, UserId, String) {
    let (listing_id, owner) = ready_listing(m);

    let StartCheckout::Redirect { session_id, .. } = m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect to the processor");
    };
    m.processor().complete_session(&session_id);

    let outcome = m.finish_checkout(listing_id, &session_id).unwrap();
    assert!(outcome.applied);

    (listing_id, owner, session_id)
}

#[test]
fn full_activation_flow() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);

    let row = m.listing(listing_id).unwrap();
    assert_eq!(row.status, ListingStatus::Active);
    assert_eq!(row.paid_amount_pence, EXPECTED_FEE);
    assert!(row.paid_at.is_some());
    let window = row.active_until.unwrap() - row.active_from.unwrap();
    assert_eq!(window, Duration::days(30));
    assert!(row.completion_steps().activated);
}

#[test]
fn replayed_webhook_changes_nothing_and_reports_not_applied() {
    let m = marketplace();
    let (listing_id, _, session_id) = activated_listing(&m);
    let first = m.listing(listing_id).unwrap();

    // Same confirmation delivered again (processor retry).
    let state = m.processor().retrieve_session(&session_id).unwrap();
    let outcome = m.reconcile_payment(listing_id, state.confirmation()).unwrap();

    assert!(!outcome.applied);
    assert_eq!(m.listing(listing_id).unwrap(), first);
}

#[test]
fn start_checkout_reuses_an_open_session() {
    let m = marketplace();
    let (listing_id, owner) = ready_listing(&m);

    let StartCheckout::Redirect { session_id: first, .. } =
        m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect");
    };
    let StartCheckout::Redirect { session_id: second, .. } =
        m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect");
    };

    // No duplicate fee collection: the open session is returned as-is.
    assert_eq!(first, second);
}

#[test]
fn start_checkout_reconciles_a_completed_session_instead_of_reissuing() {
    let m = marketplace();
    let (listing_id, owner) = ready_listing(&m);

    let StartCheckout::Redirect { session_id, .. } = m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect");
    };
    // Paid at the processor, but neither webhook nor redirect has landed yet.
    m.processor().complete_session(&session_id);

    let outcome = m.start_checkout(listing_id, owner).unwrap();
    assert_eq!(outcome, StartCheckout::AlreadyActive);
    assert_eq!(m.listing(listing_id).unwrap().status, ListingStatus::Active);
}

#[test]
fn concurrent_confirmations_activate_exactly_once() {
    let m = Arc::new(marketplace());
    let (listing_id, owner) = ready_listing(&m);

    let StartCheckout::Redirect { session_id, .. } = m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect");
    };
    m.processor().complete_session(&session_id);
    let confirmation = m
        .processor()
        .retrieve_session(&session_id)
        .unwrap()
        .confirmation();

    // Webhook and redirect race on the same listing.
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let m = m.clone();
            let barrier = barrier.clone();
            let confirmation = confirmation.clone();
            thread::spawn(move || {
                barrier.wait();
                m.reconcile_payment(listing_id, confirmation).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let applied = outcomes.iter().filter(|o| o.applied).count();
    assert_eq!(applied, 1, "exactly one confirmation must activate");

    let row = m.listing(listing_id).unwrap();
    assert_eq!(row.status, ListingStatus::Active);
    assert!(row.active_from.is_some());

    // The stream holds a single activation fact.
    let stream = m.event_store().load_stream(listing_id.0).unwrap();
    let activations = stream
        .iter()
        .filter(|e| e.event_type == "listings.listing.payment_confirmed")
        .count();
    assert_eq!(activations, 1);
}

#[test]
fn tampered_amount_is_acknowledged_but_never_applied() {
    let m = marketplace();
    let (listing_id, owner) = ready_listing(&m);

    let StartCheckout::Redirect { session_id, .. } = m.start_checkout(listing_id, owner).unwrap()
    else {
        panic!("expected a redirect");
    };
    // Processor reports a capture short of the expected fee.
    m.processor()
        .complete_session_with(&session_id, Some(EXPECTED_FEE - 1));

    let outcome = m.finish_checkout(listing_id, &session_id).unwrap();
    assert!(!outcome.applied);
    assert_eq!(m.listing(listing_id).unwrap().status, ListingStatus::Draft);
}

#[test]
fn offline_processor_surfaces_an_external_error() {
    let m = marketplace();
    let (listing_id, owner) = ready_listing(&m);
    m.processor().set_offline(true);

    let err = m.start_checkout(listing_id, owner).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Processor(ProcessorError::Unreachable(_))
    ));
}

#[test]
fn pledge_returns_frozen_midpoint_figures() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);
    let investor = UserId::new();

    let receipt = m.pledge(listing_id, investor, 10_000).unwrap();
    assert_eq!(receipt.expected_return_pence, 700);
    assert_eq!(receipt.expected_total_back_pence, 10_700);

    let row = m.investment(receipt.investment_id).unwrap();
    assert_eq!(row.listing_id, listing_id);
    assert_eq!(row.status, PledgeStatus::Pledged);
    assert_eq!(row.amount_pence, 10_000);
    assert_eq!(m.investments_for(investor).len(), 1);
}

#[test]
fn self_pledge_is_forbidden_and_leaves_no_rows() {
    let m = marketplace();
    let (listing_id, owner, _) = activated_listing(&m);

    let err = m.pledge(listing_id, owner, 10_000).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::Forbidden(_))
    ));
    assert!(m.investments().list_for_listing(&listing_id).is_empty());
}

#[test]
fn pledge_aborts_after_the_sweep_expired_the_listing() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);

    // The caller's read still shows an Active listing...
    assert_eq!(m.listing(listing_id).unwrap().status, ListingStatus::Active);

    // ...but the sweep expires it before the pledge reaches the stream.
    let expired = m.expire_due_listings(Utc::now() + Duration::days(31));
    assert_eq!(expired, 1);

    let err = m.pledge(listing_id, UserId::new(), 10_000).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::InvalidState(_))
    ));
    assert!(m.investments().list_for_listing(&listing_id).is_empty());
}

#[test]
fn racing_pledge_and_sweep_never_record_against_an_expired_listing() {
    let m = Arc::new(marketplace());
    let (listing_id, _, _) = activated_listing(&m);
    let investor = UserId::new();
    let sweep_at = Utc::now() + Duration::days(31);

    let barrier = Arc::new(Barrier::new(2));

    let pledger = {
        let m = m.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            m.pledge(listing_id, investor, 10_000)
        })
    };
    let sweeper = {
        let m = m.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            m.expire_due_listings(sweep_at)
        })
    };

    let pledge_result = pledger.join().unwrap();
    let _ = sweeper.join().unwrap();

    // Run the sweep once more in case the pledge won the race.
    m.expire_due_listings(sweep_at);
    assert_eq!(m.listing(listing_id).unwrap().status, ListingStatus::Expired);

    let rows = m.investments().list_for_listing(&listing_id);
    match pledge_result {
        // Pledge committed before the expiry: exactly one row, frozen figures.
        Ok(receipt) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].investment_id, receipt.investment_id);
        }
        // Pledge lost the race: re-validation under the stream lock aborted
        // it and no row was recorded.
        Err(ServiceError::Domain(DomainError::InvalidState(_))) => assert!(rows.is_empty()),
        Err(other) => panic!("unexpected pledge failure: {other}"),
    }
}

#[test]
fn retract_cancels_once_and_only_once() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);
    let investor = UserId::new();

    let receipt = m.pledge(listing_id, investor, 250_000).unwrap();
    m.retract(receipt.investment_id, investor).unwrap();

    let row = m.investment(receipt.investment_id).unwrap();
    assert_eq!(row.status, PledgeStatus::Cancelled);

    // Second retraction: invalid state, status unchanged.
    let err = m.retract(receipt.investment_id, investor).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::InvalidState(_))
    ));
    assert_eq!(
        m.investment(receipt.investment_id).unwrap().status,
        PledgeStatus::Cancelled
    );
}

#[test]
fn retract_by_another_user_is_not_found() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);

    let receipt = m.pledge(listing_id, UserId::new(), 5_000).unwrap();
    let err = m.retract(receipt.investment_id, UserId::new()).unwrap_err();
    assert!(matches!(err, ServiceError::Domain(DomainError::NotFound)));
}

#[test]
fn retract_is_blocked_after_expiry() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);
    let investor = UserId::new();
    let receipt = m.pledge(listing_id, investor, 5_000).unwrap();

    m.expire_due_listings(Utc::now() + Duration::days(31));

    let err = m.retract(receipt.investment_id, investor).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::InvalidState(_))
    ));
}

#[test]
fn expiry_sweep_counts_transitions_and_is_idempotent() {
    let m = marketplace();
    let (first, _, _) = activated_listing(&m);
    let (second, _, _) = activated_listing(&m);
    let (still_live, _) = ready_listing(&m);

    let expired = m.expire_due_listings(Utc::now() + Duration::days(31));
    assert_eq!(expired, 2);
    assert_eq!(m.listing(first).unwrap().status, ListingStatus::Expired);
    assert_eq!(m.listing(second).unwrap().status, ListingStatus::Expired);
    assert_eq!(m.listing(still_live).unwrap().status, ListingStatus::Draft);

    // Nothing left to do.
    assert_eq!(m.expire_due_listings(Utc::now() + Duration::days(31)), 0);
}

#[test]
fn funding_progress_tracks_pledges_and_retractions() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);

    let _keep = m.pledge(listing_id, UserId::new(), 600_000).unwrap();
    let drop = m.pledge(listing_id, UserId::new(), 400_000).unwrap();

    // £10k–£20k band: target 2,000,000 pence.
    let progress = m.progress(listing_id).unwrap();
    assert_eq!(progress.pledged_pence, 1_000_000);
    assert_eq!(progress.target_pence, Some(2_000_000));
    assert_eq!(progress.remaining_pence, Some(1_000_000));
    assert_eq!(progress.progress_pct, 50);

    m.retract(drop.investment_id, m.investment(drop.investment_id).unwrap().investor)
        .unwrap();
    let progress = m.progress(listing_id).unwrap();
    assert_eq!(progress.pledged_pence, 600_000);
    assert_eq!(progress.progress_pct, 30);
}

#[test]
fn estimate_return_spans_the_band() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);

    // 5–9% band on £500.00.
    let estimate = m.estimate_return(listing_id, 50_000).unwrap();
    assert_eq!(estimate.at_min.expected_return_pence, 2_500);
    assert_eq!(estimate.at_max.expected_return_pence, 4_500);
    assert_eq!(estimate.at_max.expected_total_back_pence, 54_500);

    let err = m.estimate_return(listing_id, 0).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Domain(DomainError::Validation(_))
    ));
}

#[test]
fn deleting_a_draft_cascades_its_read_model_rows() {
    let m = marketplace();
    let (listing_id, owner) = ready_listing(&m);

    m.delete_listing(listing_id, owner).unwrap();

    assert!(m.listing(listing_id).is_none());
    let err = m.pledge(listing_id, UserId::new(), 10_000).unwrap_err();
    assert!(matches!(err, ServiceError::Domain(DomainError::NotFound)));
}

#[test]
fn read_models_rebuild_from_the_event_store() {
    let m = marketplace();
    let (listing_id, _, _) = activated_listing(&m);
    m.pledge(listing_id, UserId::new(), 10_000).unwrap();

    // Replay the raw stream into a fresh projection.
    let stream = m.event_store().load_stream(listing_id.0).unwrap();
    let envelopes: Vec<EventEnvelope<ListingEvent>> = stream
        .iter()
        .map(|stored| {
            EventEnvelope::new(
                stored.event_id,
                stored.aggregate_id,
                stored.aggregate_type.clone(),
                stored.sequence_number,
                serde_json::from_value(stored.payload.clone()).unwrap(),
            )
        })
        .collect();

    let rebuilt = ProjectionRunner::rebuild_from_scratch(
        || ListingsProjection::new(Arc::new(InMemoryStore::new())),
        envelopes.iter(),
    );

    assert_eq!(rebuilt.get(&listing_id), m.listing(listing_id));
}
