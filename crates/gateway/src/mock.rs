//! Deterministic in-memory gateway for tests.
//!
//! Behaves like the real provider for the happy paths (intents get ids and
//! client secrets, refunds get refund ids) and exposes switches to script
//! failures for the unhappy ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::client::{GatewayError, IntentDetails, IntentHandle, PaymentGateway, RefundHandle};

/// A recorded refund call.
#[derive(Debug, Clone)]
pub struct RecordedRefund {
    pub charge_id: String,
    pub amount_minor: i64,
}

#[derive(Debug, Clone)]
struct MockIntent {
    amount_minor: i64,
    charge_id: String,
}

/// Scriptable in-memory [`PaymentGateway`].
#[derive(Default)]
pub struct MockPaymentGateway {
    counter: AtomicU64,
    intents: Mutex<HashMap<String, MockIntent>>,
    refunds: Mutex<Vec<RecordedRefund>>,
    fail_refunds: AtomicBool,
    fail_creates: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `refund` calls fail with a gateway error.
    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_intent` calls fail with a gateway error.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// All refund calls seen so far.
    pub fn recorded_refunds(&self) -> Vec<RecordedRefund> {
        self.refunds.lock().unwrap().clone()
    }

    /// The remote amount of an intent, if it exists.
    pub fn intent_amount(&self, intent_id: &str) -> Option<i64> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .map(|i| i.amount_minor)
    }

    /// The charge id the mock assigned to an intent.
    pub fn charge_id_for(&self, intent_id: &str) -> Option<String> {
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .map(|i| i.charge_id.clone())
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        _currency: &str,
        _metadata: &HashMap<String, String>,
    ) -> Result<IntentHandle, GatewayError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 502,
                message: "mock create failure".to_string(),
            });
        }
        let n = self.next();
        let intent_id = format!("pi_mock_{n}");
        self.intents.lock().unwrap().insert(
            intent_id.clone(),
            MockIntent {
                amount_minor,
                charge_id: format!("ch_mock_{n}"),
            },
        );
        Ok(IntentHandle {
            client_secret: format!("{intent_id}_secret"),
            intent_id,
        })
    }

    async fn update_intent_amount(
        &self,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<(), GatewayError> {
        let mut intents = self.intents.lock().unwrap();
        match intents.get_mut(intent_id) {
            Some(intent) => {
                intent.amount_minor = amount_minor;
                Ok(())
            }
            None => Err(GatewayError::Status {
                status: 404,
                message: format!("no such intent: {intent_id}"),
            }),
        }
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentDetails, GatewayError> {
        let intents = self.intents.lock().unwrap();
        match intents.get(intent_id) {
            Some(intent) => Ok(IntentDetails {
                status: "succeeded".to_string(),
                charge_id: Some(intent.charge_id.clone()),
            }),
            None => Err(GatewayError::Status {
                status: 404,
                message: format!("no such intent: {intent_id}"),
            }),
        }
    }

    async fn refund(
        &self,
        charge_id: &str,
        amount_minor: i64,
        _metadata: &HashMap<String, String>,
    ) -> Result<RefundHandle, GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 502,
                message: "mock refund failure".to_string(),
            });
        }
        self.refunds.lock().unwrap().push(RecordedRefund {
            charge_id: charge_id.to_string(),
            amount_minor,
        });
        Ok(RefundHandle {
            refund_id: format!("re_mock_{}", self.next()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intents_are_unique_and_updatable() {
        let gateway = MockPaymentGateway::new();
        let meta = HashMap::new();
        let a = gateway.create_intent(1000, "usd", &meta).await.unwrap();
        let b = gateway.create_intent(2000, "usd", &meta).await.unwrap();
        assert_ne!(a.intent_id, b.intent_id);

        gateway.update_intent_amount(&a.intent_id, 1500).await.unwrap();
        assert_eq!(gateway.intent_amount(&a.intent_id), Some(1500));
    }

    #[tokio::test]
    async fn scripted_refund_failure() {
        let gateway = MockPaymentGateway::new();
        gateway.fail_refunds(true);
        let err = gateway.refund("ch_1", 100, &HashMap::new()).await;
        assert!(err.is_err());
        assert!(gateway.recorded_refunds().is_empty());
    }
}
