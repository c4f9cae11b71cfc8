use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use plotfund_core::money::return_for;
use plotfund_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, ReturnFigures, UserId,
};
use plotfund_events::Event;
use plotfund_payments::PaymentConfirmation;

use crate::fields::{Country, DraftPatch, FundingBand, MediaKind, ReturnBand, ReturnType, UseType};

/// Stream/aggregate type identifier for listing streams.
pub const LISTING_AGGREGATE_TYPE: &str = "listings.listing";

/// Listing identifier (one listing = one event stream).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub AggregateId);

impl ListingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ListingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Investment (pledge) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestmentId(pub AggregateId);

impl InvestmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InvestmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Media attachment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub AggregateId);

impl MediaId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MediaId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Listing lifecycle. One-way: Draft → Active → Expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    Active,
    Expired,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Active => "active",
            ListingStatus::Expired => "expired",
        }
    }
}

/// Pledge lifecycle. One-way: Pledged → Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PledgeStatus {
    Pledged,
    Cancelled,
}

/// A media attachment's metadata (file storage lives elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub media_id: MediaId,
    pub kind: MediaKind,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A pledge as recorded in the listing's book.
///
/// Amount and expected figures are frozen at creation; only `status` ever
/// changes, and only Pledged → Cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PledgeRecord {
    pub investor: UserId,
    pub amount_pence: i64,
    pub figures: ReturnFigures,
    pub status: PledgeStatus,
    pub created_at: DateTime<Utc>,
}

/// Dashboard breakdown of the owner's progress towards activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSteps {
    /// Project details (project name is optional; the project term is not).
    pub project_details: bool,
    /// Source and target use.
    pub project_type: bool,
    /// Funding band, return type, return band and listing duration.
    pub funding_and_returns: bool,
    /// Country, county and postcode prefix.
    pub location: bool,
    /// At least one media attachment.
    pub uploads: bool,
    /// True only once the listing is Active, not merely ready.
    pub activated: bool,
}

/// Aggregate root: a property listing and the pledge book recorded against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    id: ListingId,
    owner: Option<UserId>,
    status: ListingStatus,

    project_name: Option<String>,
    source_use: Option<UseType>,
    target_use: Option<UseType>,
    country: Option<Country>,
    county: Option<String>,
    postcode_prefix: Option<String>,
    funding_band: Option<FundingBand>,
    return_type: Option<ReturnType>,
    return_band: Option<ReturnBand>,
    duration_days: Option<u32>,
    project_duration_days: Option<u32>,

    media: Vec<MediaAttachment>,

    // Payment correlation with the checkout processor.
    expected_amount_pence: i64,
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    paid_amount_pence: i64,
    paid_at: Option<DateTime<Utc>>,

    active_from: Option<DateTime<Utc>>,
    active_until: Option<DateTime<Utc>>,

    pledges: HashMap<InvestmentId, PledgeRecord>,

    version: u64,
    created: bool,
    deleted: bool,
}

impl Listing {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ListingId) -> Self {
        Self {
            id,
            owner: None,
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
            media: Vec::new(),
            expected_amount_pence: 0,
            checkout_session_id: None,
            payment_intent_id: None,
            paid_amount_pence: 0,
            paid_at: None,
            active_from: None,
            active_until: None,
            pledges: HashMap::new(),
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> ListingId {
        self.id
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn funding_band(&self) -> Option<FundingBand> {
        self.funding_band
    }

    pub fn return_band(&self) -> Option<ReturnBand> {
        self.return_band
    }

    pub fn duration_days(&self) -> Option<u32> {
        self.duration_days
    }

    pub fn media(&self) -> &[MediaAttachment] {
        &self.media
    }

    pub fn expected_amount_pence(&self) -> i64 {
        self.expected_amount_pence
    }

    pub fn checkout_session_id(&self) -> Option<&str> {
        self.checkout_session_id.as_deref()
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent_id.as_deref()
    }

    pub fn paid_amount_pence(&self) -> i64 {
        self.paid_amount_pence
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn active_from(&self) -> Option<DateTime<Utc>> {
        self.active_from
    }

    pub fn active_until(&self) -> Option<DateTime<Utc>> {
        self.active_until
    }

    pub fn pledges(&self) -> &HashMap<InvestmentId, PledgeRecord> {
        &self.pledges
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, ListingStatus::Draft)
    }

    /// True when the listing has passed its active window at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ListingStatus::Expired)
            || self.active_until.is_some_and(|until| until <= now)
    }

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
            uploads: !self.media.is_empty(),
            activated: self.status == ListingStatus::Active,
        }
    }

    /// Server-side activation-readiness gate.
    ///
    /// Every descriptive field must be filled and at least one media
    /// attachment must exist before a checkout session may be issued.
    pub fn is_ready_for_activation(&self) -> bool {
        let steps = self.completion_steps();
        steps.project_details
            && steps.project_type
            && steps.funding_and_returns
            && steps.location
            && steps.uploads
    }
}

impl AggregateRoot for Listing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenListing (create a new draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenListing {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SaveDraft (typed partial update; resets payment correlation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveDraft {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub patch: DraftPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachMedia.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachMedia {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub media_id: MediaId,
    pub kind: MediaKind,
    pub filename: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveMedia.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMedia {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub media_id: MediaId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCheckoutSession (correlate a processor session with the fee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCheckoutSession {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub session_id: String,
    pub expected_amount_pence: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelCheckout (payer backed out; drop the correlation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCheckout {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment (reconcile a processor confirmation; both the
/// webhook and the post-redirect path issue exactly this command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub listing_id: ListingId,
    pub confirmation: PaymentConfirmation,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PledgeInvestment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeInvestment {
    pub listing_id: ListingId,
    pub investment_id: InvestmentId,
    pub investor: UserId,
    pub amount_pence: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetractPledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractPledge {
    pub listing_id: ListingId,
    pub investment_id: InvestmentId,
    pub investor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireListing (issued by the scheduled sweep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireListing {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteListing (drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteListing {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingCommand {
    OpenListing(OpenListing),
    SaveDraft(SaveDraft),
    AttachMedia(AttachMedia),
    RemoveMedia(RemoveMedia),
    RecordCheckoutSession(RecordCheckoutSession),
    CancelCheckout(CancelCheckout),
    ConfirmPayment(ConfirmPayment),
    PledgeInvestment(PledgeInvestment),
    RetractPledge(RetractPledge),
    ExpireListing(ExpireListing),
    DeleteListing(DeleteListing),
}

/// Event: ListingOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingOpened {
    pub listing_id: ListingId,
    pub owner: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DraftSaved. Carries the full editable field set; application
/// overwrites every draft field and clears any payment correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSaved {
    pub listing_id: ListingId,
    pub patch: DraftPatch,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MediaAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttached {
    pub listing_id: ListingId,
    pub media_id: MediaId,
    pub kind: MediaKind,
    pub filename: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MediaRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRemoved {
    pub listing_id: ListingId,
    pub media_id: MediaId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CheckoutSessionRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRecorded {
    pub listing_id: ListingId,
    pub session_id: String,
    pub expected_amount_pence: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CheckoutCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCancelled {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentConfirmed. Records the captured fee and activates the
/// listing in one fact; the active window is computed at decision time so the
/// event is self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub listing_id: ListingId,
    pub session_id: String,
    pub amount_pence: i64,
    pub payment_intent_id: Option<String>,
    pub active_from: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvestmentPledged. Expected figures are frozen here and never
/// recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentPledged {
    pub listing_id: ListingId,
    pub investment_id: InvestmentId,
    pub investor: UserId,
    pub amount_pence: i64,
    pub expected_return_pence: i64,
    pub expected_total_back_pence: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PledgeRetracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeRetracted {
    pub listing_id: ListingId,
    pub investment_id: InvestmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingExpired {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingDeleted (tombstone; drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDeleted {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingEvent {
    ListingOpened(ListingOpened),
    DraftSaved(DraftSaved),
    MediaAttached(MediaAttached),
    MediaRemoved(MediaRemoved),
    CheckoutSessionRecorded(CheckoutSessionRecorded),
    CheckoutCancelled(CheckoutCancelled),
    PaymentConfirmed(PaymentConfirmed),
    InvestmentPledged(InvestmentPledged),
    PledgeRetracted(PledgeRetracted),
    ListingExpired(ListingExpired),
    ListingDeleted(ListingDeleted),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::ListingOpened(_) => "listings.listing.opened",
            ListingEvent::DraftSaved(_) => "listings.listing.draft_saved",
            ListingEvent::MediaAttached(_) => "listings.listing.media_attached",
            ListingEvent::MediaRemoved(_) => "listings.listing.media_removed",
            ListingEvent::CheckoutSessionRecorded(_) => "listings.listing.checkout_recorded",
            ListingEvent::CheckoutCancelled(_) => "listings.listing.checkout_cancelled",
            ListingEvent::PaymentConfirmed(_) => "listings.listing.payment_confirmed",
            ListingEvent::InvestmentPledged(_) => "investments.pledge.created",
            ListingEvent::PledgeRetracted(_) => "investments.pledge.retracted",
            ListingEvent::ListingExpired(_) => "listings.listing.expired",
            ListingEvent::ListingDeleted(_) => "listings.listing.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::ListingOpened(e) => e.occurred_at,
            ListingEvent::DraftSaved(e) => e.occurred_at,
            ListingEvent::MediaAttached(e) => e.occurred_at,
            ListingEvent::MediaRemoved(e) => e.occurred_at,
            ListingEvent::CheckoutSessionRecorded(e) => e.occurred_at,
            ListingEvent::CheckoutCancelled(e) => e.occurred_at,
            ListingEvent::PaymentConfirmed(e) => e.occurred_at,
            ListingEvent::InvestmentPledged(e) => e.occurred_at,
            ListingEvent::PledgeRetracted(e) => e.occurred_at,
            ListingEvent::ListingExpired(e) => e.occurred_at,
            ListingEvent::ListingDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Listing {
    type Command = ListingCommand;
    type Event = ListingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ListingEvent::ListingOpened(e) => {
                self.id = e.listing_id;
                self.owner = Some(e.owner);
                self.status = ListingStatus::Draft;
                self.created = true;
            }
            ListingEvent::DraftSaved(e) => {
                let patch = &e.patch;
                self.project_name = patch.project_name.clone();
                self.source_use = patch.source_use;
                self.target_use = patch.target_use;
                self.country = patch.country;
                self.county = patch.county.clone();
                self.postcode_prefix = patch.postcode_prefix.clone();
                self.funding_band = patch.funding_band;
                self.return_type = patch.return_type;
                self.return_band = patch.return_band;
                self.duration_days = patch.duration_days;
                self.project_duration_days = patch.project_duration_days;
                self.reset_payment_correlation();
            }
            ListingEvent::MediaAttached(e) => {
                self.media.push(MediaAttachment {
                    media_id: e.media_id,
                    kind: e.kind,
                    filename: e.filename.clone(),
                    uploaded_at: e.occurred_at,
                });
                self.reset_payment_correlation();
            }
            ListingEvent::MediaRemoved(e) => {
                self.media.retain(|m| m.media_id != e.media_id);
                self.reset_payment_correlation();
            }
            ListingEvent::CheckoutSessionRecorded(e) => {
                self.expected_amount_pence = e.expected_amount_pence;
                self.checkout_session_id = Some(e.session_id.clone());
                self.payment_intent_id = None;
                self.paid_amount_pence = 0;
                self.paid_at = None;
            }
            ListingEvent::CheckoutCancelled(_) => {
                self.reset_payment_correlation();
            }
            ListingEvent::PaymentConfirmed(e) => {
                self.paid_amount_pence = e.amount_pence;
                self.paid_at = Some(e.occurred_at);
                self.payment_intent_id = e.payment_intent_id.clone();
                self.status = ListingStatus::Active;
                self.active_from = Some(e.active_from);
                self.active_until = Some(e.active_until);
            }
            ListingEvent::InvestmentPledged(e) => {
                self.pledges.insert(
                    e.investment_id,
                    PledgeRecord {
                        investor: e.investor,
                        amount_pence: e.amount_pence,
                        figures: ReturnFigures {
                            expected_return_pence: e.expected_return_pence,
                            expected_total_back_pence: e.expected_total_back_pence,
                        },
                        status: PledgeStatus::Pledged,
                        created_at: e.occurred_at,
                    },
                );
            }
            ListingEvent::PledgeRetracted(e) => {
                if let Some(pledge) = self.pledges.get_mut(&e.investment_id) {
                    pledge.status = PledgeStatus::Cancelled;
                }
            }
            ListingEvent::ListingExpired(_) => {
                self.status = ListingStatus::Expired;
            }
            ListingEvent::ListingDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ListingCommand::OpenListing(cmd) => self.handle_open(cmd),
            ListingCommand::SaveDraft(cmd) => self.handle_save_draft(cmd),
            ListingCommand::AttachMedia(cmd) => self.handle_attach_media(cmd),
            ListingCommand::RemoveMedia(cmd) => self.handle_remove_media(cmd),
            ListingCommand::RecordCheckoutSession(cmd) => self.handle_record_checkout(cmd),
            ListingCommand::CancelCheckout(cmd) => self.handle_cancel_checkout(cmd),
            ListingCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            ListingCommand::PledgeInvestment(cmd) => self.handle_pledge(cmd),
            ListingCommand::RetractPledge(cmd) => self.handle_retract(cmd),
            ListingCommand::ExpireListing(cmd) => self.handle_expire(cmd),
            ListingCommand::DeleteListing(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Listing {
    fn reset_payment_correlation(&mut self) {
        // An edited listing must never keep a stale "ready to pay" session.
        self.expected_amount_pence = 0;
        self.checkout_session_id = None;
        self.payment_intent_id = None;
        self.paid_amount_pence = 0;
        self.paid_at = None;
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_listing_id(&self, listing_id: ListingId) -> Result<(), DomainError> {
        if self.id != listing_id {
            return Err(DomainError::invalid_state("listing_id mismatch"));
        }
        Ok(())
    }

    fn ensure_owner(&self, owner: UserId) -> Result<(), DomainError> {
        // A foreign listing is indistinguishable from a missing one.
        if self.owner != Some(owner) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_draft(&self, action: &str) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invalid_state(format!(
                "only draft listings can be {action}"
            )));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenListing) -> Result<Vec<ListingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("listing already exists"));
        }

        Ok(vec![ListingEvent::ListingOpened(ListingOpened {
            listing_id: cmd.listing_id,
            owner: cmd.owner,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_save_draft(&self, cmd: &SaveDraft) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;
        self.ensure_draft("edited")?;

        cmd.patch.validate()?;

        Ok(vec![ListingEvent::DraftSaved(DraftSaved {
            listing_id: cmd.listing_id,
            patch: cmd.patch.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach_media(&self, cmd: &AttachMedia) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;
        self.ensure_draft("edited")?;

        if cmd.filename.trim().is_empty() {
            return Err(DomainError::validation("filename must not be blank"));
        }
        if self.media.iter().any(|m| m.media_id == cmd.media_id) {
            return Err(DomainError::conflict("media already attached"));
        }

        Ok(vec![ListingEvent::MediaAttached(MediaAttached {
            listing_id: cmd.listing_id,
            media_id: cmd.media_id,
            kind: cmd.kind,
            filename: cmd.filename.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_media(&self, cmd: &RemoveMedia) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;
        self.ensure_draft("edited")?;

        if !self.media.iter().any(|m| m.media_id == cmd.media_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![ListingEvent::MediaRemoved(MediaRemoved {
            listing_id: cmd.listing_id,
            media_id: cmd.media_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_checkout(
        &self,
        cmd: &RecordCheckoutSession,
    ) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;
        self.ensure_draft("paid for")?;

        if !self.is_ready_for_activation() {
            return Err(DomainError::invalid_state(
                "complete all steps (including at least one upload) before activating",
            ));
        }
        if cmd.session_id.trim().is_empty() {
            return Err(DomainError::validation("session_id must not be blank"));
        }
        if cmd.expected_amount_pence <= 0 {
            return Err(DomainError::validation(
                "expected activation fee must be positive",
            ));
        }

        Ok(vec![ListingEvent::CheckoutSessionRecorded(
            CheckoutSessionRecorded {
                listing_id: cmd.listing_id,
                session_id: cmd.session_id.clone(),
                expected_amount_pence: cmd.expected_amount_pence,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel_checkout(
        &self,
        cmd: &CancelCheckout,
    ) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;

        // A stale cancel redirect must never touch a listing that has left
        // Draft, and an uncorrelated draft has nothing to reset.
        if self.status != ListingStatus::Draft
            || (self.checkout_session_id.is_none() && self.expected_amount_pence == 0)
        {
            return Ok(vec![]);
        }

        Ok(vec![ListingEvent::CheckoutCancelled(CheckoutCancelled {
            listing_id: cmd.listing_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Reconcile an external payment confirmation.
    ///
    /// Preconditions are checked in order; each violation is a silent no-op
    /// (empty event list), because webhook replays and stale redirects must be
    /// acknowledged, not failed. The single exception is a missing listing
    /// duration, which cannot be caused by the processor and is a fatal
    /// invalid-state error.
    fn handle_confirm_payment(
        &self,
        cmd: &ConfirmPayment,
    ) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;

        let confirmation = &cmd.confirmation;

        if !confirmation.is_paid() {
            return Ok(vec![]);
        }
        if confirmation.session_id.trim().is_empty() {
            return Ok(vec![]);
        }
        if let Some(correlation) = confirmation.correlation_id {
            if correlation != self.id.0 {
                return Ok(vec![]);
            }
        }
        // Already applied (or past its window): idempotent no-op.
        if self.status != ListingStatus::Draft {
            return Ok(vec![]);
        }
        // A newer checkout session may have superseded the one that paid.
        if let Some(recorded) = &self.checkout_session_id {
            if recorded != &confirmation.session_id {
                return Ok(vec![]);
            }
        }
        let Some(captured) = confirmation.amount_captured_pence else {
            return Ok(vec![]);
        };
        if self.expected_amount_pence == 0 || captured != self.expected_amount_pence {
            return Ok(vec![]);
        }

        // A listing that reached checkout without a duration is a programming
        // error, not something the processor can cause.
        let Some(duration_days) = self.duration_days else {
            return Err(DomainError::invalid_state(
                "listing duration is required to activate the listing",
            ));
        };

        let active_from = cmd.occurred_at;
        let active_until = active_from + Duration::days(i64::from(duration_days));

        Ok(vec![ListingEvent::PaymentConfirmed(PaymentConfirmed {
            listing_id: cmd.listing_id,
            session_id: confirmation.session_id.clone(),
            amount_pence: captured,
            payment_intent_id: confirmation.payment_intent_id.clone(),
            active_from,
            active_until,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pledge(&self, cmd: &PledgeInvestment) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;

        if self.status != ListingStatus::Active {
            return Err(DomainError::invalid_state(
                "listing is not open for investment",
            ));
        }
        if self.owner == Some(cmd.investor) {
            return Err(DomainError::forbidden(
                "you cannot invest in your own listing",
            ));
        }
        if cmd.amount_pence <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.pledges.contains_key(&cmd.investment_id) {
            return Err(DomainError::conflict("investment already exists"));
        }

        let band = self.return_band.ok_or_else(|| {
            DomainError::configuration("return band is not configured correctly")
        })?;

        if self.is_expired_at(cmd.occurred_at) {
            return Err(DomainError::invalid_state("listing has expired"));
        }

        let figures = return_for(cmd.amount_pence, band.midpoint());

        Ok(vec![ListingEvent::InvestmentPledged(InvestmentPledged {
            listing_id: cmd.listing_id,
            investment_id: cmd.investment_id,
            investor: cmd.investor,
            amount_pence: cmd.amount_pence,
            expected_return_pence: figures.expected_return_pence,
            expected_total_back_pence: figures.expected_total_back_pence,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retract(&self, cmd: &RetractPledge) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;

        let pledge = self
            .pledges
            .get(&cmd.investment_id)
            .ok_or_else(DomainError::not_found)?;
        if pledge.investor != cmd.investor {
            // Someone else's pledge looks like a missing one.
            return Err(DomainError::not_found());
        }
        if pledge.status != PledgeStatus::Pledged {
            return Err(DomainError::invalid_state(
                "this pledge cannot be retracted",
            ));
        }
        if self.status != ListingStatus::Active {
            return Err(DomainError::invalid_state(
                "a pledge can only be retracted while the listing is still active",
            ));
        }
        if self.is_expired_at(cmd.occurred_at) {
            return Err(DomainError::invalid_state(
                "a pledge can only be retracted before the listing expires",
            ));
        }

        Ok(vec![ListingEvent::PledgeRetracted(PledgeRetracted {
            listing_id: cmd.listing_id,
            investment_id: cmd.investment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireListing) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;

        // The sweep may race itself or a freshly expired listing; both are
        // clean no-ops rather than errors.
        if self.status != ListingStatus::Active {
            return Ok(vec![]);
        }
        match self.active_until {
            Some(until) if until <= cmd.occurred_at => {}
            _ => return Ok(vec![]),
        }

        Ok(vec![ListingEvent::ListingExpired(ListingExpired {
            listing_id: cmd.listing_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteListing) -> Result<Vec<ListingEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.owner)?;
        self.ensure_draft("deleted")?;

        Ok(vec![ListingEvent::ListingDeleted(ListingDeleted {
            listing_id: cmd.listing_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
