use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    /// A refund has been claimed and is with the provider.
    Refunding,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunding => "refunding",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, Refunding)
                | (Refunding, Refunded)
                | (Refunding, Completed)
        )
    }

    /// Money has been captured for this attempt, whether or not it was later returned.
    pub fn is_captured(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Refunding | PaymentStatus::Refunded
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    MobileWallet,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::MobileWallet => "mobile_wallet",
            PaymentMethod::Cash => "cash",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub amount: Money,
    pub fee_amount: Money,
    pub net_amount: Money,
    pub refund_amount: Option<Money>,
    pub method: PaymentMethod,
    pub provider: String,
    pub status: PaymentStatus,
    /// Known only to us and the provider; callbacks are matched on it.
    #[serde(skip_serializing)]
    pub provider_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// What the park kept from this attempt after any refund.
    pub fn retained_amount(&self) -> Money {
        match self.status {
            PaymentStatus::Completed | PaymentStatus::Refunding => self.amount,
            PaymentStatus::Refunded => self.amount - self.refund_amount.unwrap_or(self.amount),
            _ => Money::ZERO,
        }
    }
}

/// Terminal result reported by the payment provider for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Body of a provider callback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderCallback {
    pub transaction_id: String,
    #[serde(flatten)]
    pub outcome: PaymentOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn test_refunds_go_through_a_claim() {
        for next in [Pending, Processing, Failed, Cancelled, Completed, Refunded] {
            assert!(!Completed.can_transition_to(next), "completed -> {next}");
        }
        assert!(Completed.can_transition_to(Refunding));
        assert!(Refunding.can_transition_to(Refunded));
        assert!(Refunding.can_transition_to(Completed));
        assert!(!Refunding.can_transition_to(Cancelled));
    }

    #[test]
    fn test_failed_cancelled_and_refunded_are_final() {
        for from in [Failed, Cancelled, Refunded] {
            for next in [Pending, Processing, Completed, Failed, Cancelled, Refunding, Refunded] {
                assert!(!from.can_transition_to(next), "{from} -> {next}");
            }
        }
    }

    #[test]
    fn test_transaction_id_is_not_serialized() {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: Money::new(750),
            fee_amount: Money::new(19),
            net_amount: Money::new(731),
            refund_amount: None,
            method: PaymentMethod::Card,
            provider: "simulated".to_string(),
            status: Processing,
            provider_transaction_id: Some("sim_txn_secret".to_string()),
            failure_reason: None,
            created_at: now,
            updated_at: now,
            captured_at: None,
            failed_at: None,
            refunded_at: None,
        };

        let json = serde_json::to_value(&payment).unwrap();
        assert!(json.get("provider_transaction_id").is_none());
        assert_eq!(json["status"], "processing");
    }

    #[test]
    fn test_callback_body_shape() {
        let callback: ProviderCallback = serde_json::from_str(
            r#"{"transaction_id":"sim_txn_1","status":"failed","reason":"card declined"}"#,
        )
        .unwrap();
        assert_eq!(callback.transaction_id, "sim_txn_1");
        assert!(matches!(callback.outcome, PaymentOutcome::Failed { .. }));
    }

    #[test]
    fn test_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentMethod::MobileWallet).unwrap(),
            "\"mobile_wallet\""
        );
    }

    #[test]
    fn test_outcome_deserializes_from_webhook_shape() {
        let ok: PaymentOutcome = serde_json::from_str(r#"{"status":"succeeded"}"#).unwrap();
        assert_eq!(ok, PaymentOutcome::Succeeded);

        let failed: PaymentOutcome =
            serde_json::from_str(r#"{"status":"failed","reason":"card declined"}"#).unwrap();
        assert_eq!(
            failed,
            PaymentOutcome::Failed {
                reason: "card declined".to_string()
            }
        );
    }
}
