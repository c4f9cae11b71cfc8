use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use plotfund_core::UserId;
use plotfund_infra::{InMemoryEventStore, Marketplace, StartCheckout};
use plotfund_listings::{
    Country, DraftPatch, FundingBand, ListingId, MediaKind, PricingTable, ReturnBand, ReturnType,
    UseType,
};
use plotfund_payments::{InMemoryProcessor, PaymentConfirmation};

type BenchMarketplace = Marketplace<InMemoryEventStore, InMemoryProcessor>;

fn full_patch() -> DraftPatch {
    DraftPatch {
        project_name: Some("Benchmark Mill".to_string()),
        source_use: Some(UseType::Industrial),
        target_use: Some(UseType::Residential),
        country: Some(Country::England),
        county: Some("Essex".to_string()),
        postcode_prefix: Some("CM".to_string()),
        funding_band: Some(FundingBand::B151kTo250k),
        return_type: Some(ReturnType::FinancialPayback),
        return_band: Some(ReturnBand::R10To14),
        duration_days: Some(60),
        project_duration_days: Some(730),
    }
}

/// Marketplace with one activated listing, plus the paid confirmation that
/// activated it (for replay benchmarks).
fn setup_activated() -> (BenchMarketplace, ListingId, PaymentConfirmation) {
    let m = Marketplace::new(
        InMemoryEventStore::new(),
        InMemoryProcessor::new(),
        PricingTable::default(),
    );

    let owner = UserId::new();
    let listing_id = m.open_listing(owner).unwrap();
    m.save_draft(listing_id, owner, full_patch()).unwrap();
    m.attach_media(listing_id, owner, MediaKind::Image, "site.jpg")
        .unwrap();

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

    let outcome = m.finish_checkout(listing_id, &session_id).unwrap();
    assert!(outcome.applied);

    (m, listing_id, confirmation)
}

/// Pledge dispatch latency as the listing's stream grows.
///
/// Every pledge rehydrates the aggregate from its full history, so this
/// tracks the cost of load + handle + optimistic append at different stream
/// depths.
fn bench_pledge_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("pledge_dispatch");
    group.throughput(Throughput::Elements(1));

    for history in [0usize, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(history),
            &history,
            |b, &history| {
                let (m, listing_id, _) = setup_activated();
                for _ in 0..history {
                    m.pledge(listing_id, UserId::new(), 1_000).unwrap();
                }
                b.iter(|| {
                    let receipt = m
                        .pledge(black_box(listing_id), UserId::new(), 10_000)
                        .unwrap();
                    black_box(receipt)
                });
            },
        );
    }

    group.finish();
}

/// Cost of acknowledging a replayed confirmation (the webhook-retry hot
/// path): full rehydration ending in an empty decision.
fn bench_reconcile_replay_noop(c: &mut Criterion) {
    let (m, listing_id, confirmation) = setup_activated();

    c.bench_function("reconcile_replay_noop", |b| {
        b.iter(|| {
            let outcome = m
                .reconcile_payment(black_box(listing_id), confirmation.clone())
                .unwrap();
            assert!(!outcome.applied);
            black_box(outcome)
        });
    });
}

criterion_group!(benches, bench_pledge_dispatch, bench_reconcile_replay_noop);
criterion_main!(benches);
