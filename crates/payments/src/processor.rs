//! Outbound checkout-processor port.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use plotfund_core::AggregateId;

use crate::confirmation::PaymentConfirmation;

/// Checkout-processor call failure.
///
/// The engine performs no automatic retries; these are surfaced to the caller
/// and retrying is an operational concern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor could not be reached (network, timeout, outage).
    #[error("payment processor unreachable: {0}")]
    Unreachable(String),

    /// The processor rejected the request.
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),

    /// The referenced checkout session does not exist at the processor.
    #[error("unknown checkout session: {0}")]
    UnknownSession(String),
}

/// Request to open a checkout session for a listing's activation fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Fee to collect, in pence.
    pub amount_pence: i64,
    /// Listing the fee is for; echoed back in confirmations.
    pub correlation_id: AggregateId,
}

/// A freshly created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_id: String,
    /// Where to send the payer to complete the checkout.
    pub redirect_url: String,
}

/// Lifecycle of a checkout session at the processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Still collecting payment; the payer can be sent back to it.
    Open,
    /// Checkout finished (the payment may or may not have been captured).
    Complete,
    /// Abandoned or timed out at the processor.
    Expired,
}

/// Snapshot of a checkout session as reported by `retrieve_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    /// Present while the session is still open.
    pub redirect_url: Option<String>,
    pub payment_status: String,
    pub amount_total_pence: Option<i64>,
    pub payment_intent_id: Option<String>,
    pub correlation_id: Option<AggregateId>,
}

impl SessionState {
    /// View this session snapshot as a payment confirmation.
    ///
    /// This is what the redirect path feeds into reconciliation, so that both
    /// confirmation paths converge on identical input.
    pub fn confirmation(&self) -> PaymentConfirmation {
        PaymentConfirmation {
            session_id: self.session_id.clone(),
            payment_status: self.payment_status.clone(),
            amount_captured_pence: self.amount_total_pence,
            payment_intent_id: self.payment_intent_id.clone(),
            correlation_id: self.correlation_id,
        }
    }
}

/// Outbound port to the external payment processor.
///
/// The engine treats these as opaque, possibly-failing remote calls and never
/// assumes synchronous consistency between creating a session and receiving
/// its confirmation events.
pub trait CheckoutProcessor: Send + Sync {
    /// Open a checkout session collecting `amount_pence` for a listing.
    fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError>;

    /// Fetch the current state of an existing session.
    fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ProcessorError>;
}

impl<P> CheckoutProcessor for Arc<P>
where
    P: CheckoutProcessor + ?Sized,
{
    fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        (**self).create_checkout_session(request)
    }

    fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ProcessorError> {
        (**self).retrieve_session(session_id)
    }
}
