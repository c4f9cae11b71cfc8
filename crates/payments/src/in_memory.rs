//! In-memory checkout processor for tests/dev.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use plotfund_core::AggregateId;

use crate::confirmation::PAYMENT_STATUS_PAID;
use crate::processor::{
    CheckoutProcessor, CheckoutRequest, CheckoutSession, ProcessorError, SessionState,
    SessionStatus,
};

#[derive(Debug, Clone)]
struct SessionRecord {
    status: SessionStatus,
    payment_status: String,
    amount_pence: i64,
    captured_pence: Option<i64>,
    payment_intent_id: Option<String>,
    correlation_id: AggregateId,
}

/// In-memory checkout processor.
///
/// Intended for tests/dev. Sessions are created `Open`/`unpaid`; tests drive
/// them to `Complete`/`paid` (or `Expired`) through the helper methods, and
/// can take the processor offline to exercise the unreachable path.
#[derive(Debug, Default)]
pub struct InMemoryProcessor {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl InMemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `ProcessorError::Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Complete a session with the full session amount captured.
    pub fn complete_session(&self, session_id: &str) {
        self.complete_session_with(session_id, None);
    }

    /// Complete a session capturing a specific amount (tamper/partial-payment
    /// scenarios). `None` captures the session's own amount.
    pub fn complete_session_with(&self, session_id: &str, captured_pence: Option<i64>) {
        let mut sessions = self.sessions.lock().expect("processor lock");
        if let Some(record) = sessions.get_mut(session_id) {
            record.status = SessionStatus::Complete;
            record.payment_status = PAYMENT_STATUS_PAID.to_string();
            record.captured_pence = Some(captured_pence.unwrap_or(record.amount_pence));
            record.payment_intent_id = Some(format!("pi_{session_id}"));
        }
    }

    /// Expire a session at the processor (abandoned checkout).
    pub fn expire_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("processor lock");
        if let Some(record) = sessions.get_mut(session_id) {
            record.status = SessionStatus::Expired;
        }
    }

    fn ensure_online(&self) -> Result<(), ProcessorError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unreachable(
                "processor is offline".to_string(),
            ));
        }
        Ok(())
    }
}

impl CheckoutProcessor for InMemoryProcessor {
    fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        self.ensure_online()?;

        if request.amount_pence <= 0 {
            return Err(ProcessorError::Rejected(
                "amount must be positive".to_string(),
            ));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_test_{n}");

        let mut sessions = self.sessions.lock().expect("processor lock");
        sessions.insert(
            session_id.clone(),
            SessionRecord {
                status: SessionStatus::Open,
                payment_status: "unpaid".to_string(),
                amount_pence: request.amount_pence,
                captured_pence: None,
                payment_intent_id: None,
                correlation_id: request.correlation_id,
            },
        );

        Ok(CheckoutSession {
            redirect_url: format!("https://checkout.invalid/pay/{session_id}"),
            session_id,
        })
    }

    fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ProcessorError> {
        self.ensure_online()?;

        let sessions = self.sessions.lock().expect("processor lock");
        let record = sessions
            .get(session_id)
            .ok_or_else(|| ProcessorError::UnknownSession(session_id.to_string()))?;

        Ok(SessionState {
            session_id: session_id.to_string(),
            status: record.status,
            redirect_url: match record.status {
                SessionStatus::Open => Some(format!("https://checkout.invalid/pay/{session_id}")),
                _ => None,
            },
            payment_status: record.payment_status.clone(),
            amount_total_pence: record.captured_pence.or(match record.status {
                SessionStatus::Complete => Some(record.amount_pence),
                _ => None,
            }),
            payment_intent_id: record.payment_intent_id.clone(),
            correlation_id: Some(record.correlation_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_sessions_start_open_and_unpaid() {
        let processor = InMemoryProcessor::new();
        let session = processor
            .create_checkout_session(CheckoutRequest {
                amount_pence: 2_498,
                correlation_id: AggregateId::new(),
            })
            .unwrap();

        let state = processor.retrieve_session(&session.session_id).unwrap();
        assert_eq!(state.status, SessionStatus::Open);
        assert!(!state.confirmation().is_paid());
        assert!(state.redirect_url.is_some());
    }

    #[test]
    fn completed_session_reports_paid_confirmation() {
        let processor = InMemoryProcessor::new();
        let correlation_id = AggregateId::new();
        let session = processor
            .create_checkout_session(CheckoutRequest {
                amount_pence: 2_498,
                correlation_id,
            })
            .unwrap();

        processor.complete_session(&session.session_id);

        let confirmation = processor
            .retrieve_session(&session.session_id)
            .unwrap()
            .confirmation();
        assert!(confirmation.is_paid());
        assert_eq!(confirmation.amount_captured_pence, Some(2_498));
        assert_eq!(confirmation.correlation_id, Some(correlation_id));
        assert!(confirmation.payment_intent_id.is_some());
    }

    #[test]
    fn offline_processor_is_unreachable() {
        let processor = InMemoryProcessor::new();
        processor.set_offline(true);

        let err = processor
            .create_checkout_session(CheckoutRequest {
                amount_pence: 100,
                correlation_id: AggregateId::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ProcessorError::Unreachable(_)));
    }

    #[test]
    fn unknown_session_is_an_error() {
        let processor = InMemoryProcessor::new();
        let err = processor.retrieve_session("cs_missing").unwrap_err();
        assert!(matches!(err, ProcessorError::UnknownSession(_)));
    }
}
