use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Refund `amount` (minor units) against a captured payment. Returns the processor's refund id.
    async fn refund(
        &self,
        payment_reference: &str,
        amount: i64,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Default)]
pub struct MockPaymentProcessor {
    refunds: Mutex<Vec<(String, i64)>>,
    fail: AtomicBool,
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn refunds(&self) -> Vec<(String, i64)> {
        self.refunds.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn refund(
        &self,
        payment_reference: &str,
        amount: i64,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("Simulated Payment Gateway Failure".into());
        }
        let mut refunds = self.refunds.lock().map_err(|_| "refund log poisoned")?;
        refunds.push((payment_reference.to_string(), amount));
        Ok(format!("mock_re_{}", refunds.len()))
    }
}
