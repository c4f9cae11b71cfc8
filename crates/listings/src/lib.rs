//! `plotfund-listings` — the Listing aggregate.
//!
//! A listing is one consistency boundary: its lifecycle (Draft → Active →
//! Expired), its payment correlation with the external checkout processor,
//! and the pledge book recorded against it all live in a single event stream,
//! so every mutating operation on one listing is serialized against the
//! others.

pub mod fields;
pub mod listing;
pub mod pricing;

pub use fields::{
    Country, DraftPatch, FundingBand, MediaKind, ReturnBand, ReturnType, UseType,
};
pub use listing::{
    AttachMedia, CancelCheckout, CheckoutCancelled, CheckoutSessionRecorded, CompletionSteps,
    ConfirmPayment, DeleteListing, DraftSaved, ExpireListing, InvestmentId, InvestmentPledged,
    LISTING_AGGREGATE_TYPE, Listing, ListingCommand, ListingDeleted, ListingEvent, ListingExpired,
    ListingId, ListingOpened, ListingStatus, MediaAttached, MediaAttachment, MediaId, MediaRemoved,
    OpenListing, PaymentConfirmed, PledgeInvestment, PledgeRecord, PledgeRetracted, PledgeStatus,
    RecordCheckoutSession, RemoveMedia, RetractPledge, SaveDraft,
};
pub use pricing::PricingTable;
