//! Payment provider seam.
//!
//! A charge is submitted once and usually settles later: the provider calls
//! back with the final outcome for the transaction id it handed out here.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Money, PaymentMethod};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    /// Accepted; the outcome arrives later through reconciliation.
    Processing,
    Completed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    pub transaction_id: String,
    pub status: ChargeStatus,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ProviderError>;

    /// Returns the provider's refund reference.
    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<String, ProviderError>;
}

/// In-process provider for development and tests.
///
/// Cash settles on the spot. Card and wallet charges stay `processing` until
/// an outcome is reconciled, unless the provider was built with [`instant`].
///
/// [`instant`]: SimulatedProvider::instant
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    settle_immediately: bool,
    decline: Option<String>,
    refunds_unavailable: bool,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instant() -> Self {
        Self {
            settle_immediately: true,
            ..Self::default()
        }
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn without_refunds(mut self) -> Self {
        self.refunds_unavailable = true;
        self
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ProviderError> {
        let transaction_id = format!("sim_txn_{}", Uuid::new_v4().simple());

        let status = match (&self.decline, request.method) {
            (Some(reason), _) => ChargeStatus::Failed(reason.clone()),
            (None, PaymentMethod::Cash) => ChargeStatus::Completed,
            (None, _) if self.settle_immediately => ChargeStatus::Completed,
            (None, _) => ChargeStatus::Processing,
        };

        info!(
            payment_id = %request.payment_id,
            amount = %request.amount,
            method = request.method.as_str(),
            transaction_id = %transaction_id,
            "Simulated charge submitted"
        );

        Ok(ChargeReceipt {
            transaction_id,
            status,
        })
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> Result<String, ProviderError> {
        if self.refunds_unavailable {
            return Err(ProviderError::Unavailable("refunds disabled".to_string()));
        }

        let refund_id = format!("sim_refund_{}", Uuid::new_v4().simple());
        info!(
            transaction_id = %transaction_id,
            amount = %amount,
            refund_id = %refund_id,
            "Simulated refund processed"
        );
        Ok(refund_id)
    }
}
