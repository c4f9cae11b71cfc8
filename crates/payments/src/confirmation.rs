//! Payment confirmation input value.

use serde::{Deserialize, Serialize};

use plotfund_core::{AggregateId, ValueObject};

/// The processor's payment status for a fully captured payment.
///
/// Anything else ("unpaid", "no_payment_required", future vocabulary) must
/// never trigger an activation.
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// A payment confirmation as reported by the external processor.
///
/// Both delivery paths produce this value: the asynchronous webhook
/// notification, and the eager session re-verification after the payer is
/// redirected back. It is consumed transactionally against a listing and is
/// not persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Processor-issued checkout session identifier.
    pub session_id: String,

    /// Processor payment status, e.g. `"paid"`. Opaque vocabulary; only
    /// [`PAYMENT_STATUS_PAID`] is meaningful to the engine.
    pub payment_status: String,

    /// Amount the processor actually captured, in pence.
    pub amount_captured_pence: Option<i64>,

    /// Processor-issued payment intent identifier, if any.
    pub payment_intent_id: Option<String>,

    /// Correlation back to the listing the fee was paid for.
    pub correlation_id: Option<AggregateId>,
}

impl PaymentConfirmation {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PAYMENT_STATUS_PAID
    }
}

impl ValueObject for PaymentConfirmation {}
