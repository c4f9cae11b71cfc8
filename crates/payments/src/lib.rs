//! `plotfund-payments` — the payment-processor boundary.
//!
//! The engine never talks to the processor's checkout implementation directly;
//! it consumes [`PaymentConfirmation`] values (from webhooks or post-redirect
//! session lookups) and calls out through the [`CheckoutProcessor`] port.

pub mod confirmation;
pub mod in_memory;
pub mod processor;

pub use confirmation::{PaymentConfirmation, PAYMENT_STATUS_PAID};
pub use in_memory::InMemoryProcessor;
pub use processor::{
    CheckoutProcessor, CheckoutRequest, CheckoutSession, ProcessorError, SessionState,
    SessionStatus,
};
