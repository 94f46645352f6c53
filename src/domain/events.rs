//! Versioned schema for the events exchanged between the lending services.
//!
//! Every event travels inside an [`EventEnvelope`] serialized as JSON:
//!
//! ```text
//! { "version": 1, "id": "<uuid>", "exchange": "loan_events",
//!   "event": "loan.approved", "data": { ...camelCase payload... },
//!   "timestamp": "2026-01-01T00:00:00Z" }
//! ```
//!
//! Decoding validates the envelope version and the payload shape for the named
//! event. Unknown fields are ignored; missing or invalid required fields turn
//! into [`LendingError::SchemaError`].

use crate::domain::installment::InstallmentId;
use crate::domain::loan::{BorrowerId, LoanId};
use crate::domain::money::{Amount, InterestRate};
use crate::domain::payment::PaymentId;
use crate::error::{LendingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

pub const LOAN_EXCHANGE: &str = "loan_events";
pub const PAYMENT_EXCHANGE: &str = "payment_events";

pub const LOAN_APPLIED: &str = "loan.applied";
/// Older producers announce new applications under this key.
pub const LOAN_CREATED: &str = "loan.created";
pub const LOAN_APPROVED: &str = "loan.approved";
pub const LOAN_REJECTED: &str = "loan.rejected";
pub const LOAN_DISBURSED: &str = "loan.disbursed";
pub const PAYMENT_CREATED: &str = "payment.created";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApplied {
    pub loan_id: LoanId,
    pub user_id: BorrowerId,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanApproved {
    pub loan_id: LoanId,
    pub user_id: BorrowerId,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_rate: Option<InterestRate>,
    pub tenure_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRejected {
    pub loan_id: LoanId,
    pub user_id: BorrowerId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDisbursed {
    pub loan_id: LoanId,
    pub user_id: BorrowerId,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreated {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub user_id: BorrowerId,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub user_id: BorrowerId,
    pub amount: Amount,
    pub loan_id: LoanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emi_id: Option<InstallmentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub payment_id: PaymentId,
    pub order_id: String,
    pub user_id: BorrowerId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    LoanApplied(LoanApplied),
    LoanApproved(LoanApproved),
    LoanRejected(LoanRejected),
    LoanDisbursed(LoanDisbursed),
    PaymentCreated(PaymentCreated),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
}

impl DomainEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            DomainEvent::LoanApplied(_) => LOAN_APPLIED,
            DomainEvent::LoanApproved(_) => LOAN_APPROVED,
            DomainEvent::LoanRejected(_) => LOAN_REJECTED,
            DomainEvent::LoanDisbursed(_) => LOAN_DISBURSED,
            DomainEvent::PaymentCreated(_) => PAYMENT_CREATED,
            DomainEvent::PaymentCompleted(_) => PAYMENT_COMPLETED,
            DomainEvent::PaymentFailed(_) => PAYMENT_FAILED,
        }
    }

    pub fn exchange(&self) -> &'static str {
        match self {
            DomainEvent::LoanApplied(_)
            | DomainEvent::LoanApproved(_)
            | DomainEvent::LoanRejected(_)
            | DomainEvent::LoanDisbursed(_) => LOAN_EXCHANGE,
            DomainEvent::PaymentCreated(_)
            | DomainEvent::PaymentCompleted(_)
            | DomainEvent::PaymentFailed(_) => PAYMENT_EXCHANGE,
        }
    }

    pub fn borrower_id(&self) -> &str {
        match self {
            DomainEvent::LoanApplied(e) => &e.user_id,
            DomainEvent::LoanApproved(e) => &e.user_id,
            DomainEvent::LoanRejected(e) => &e.user_id,
            DomainEvent::LoanDisbursed(e) => &e.user_id,
            DomainEvent::PaymentCreated(e) => &e.user_id,
            DomainEvent::PaymentCompleted(e) => &e.user_id,
            DomainEvent::PaymentFailed(e) => &e.user_id,
        }
    }

    fn data(&self) -> Result<serde_json::Value> {
        let value = match self {
            DomainEvent::LoanApplied(e) => serde_json::to_value(e),
            DomainEvent::LoanApproved(e) => serde_json::to_value(e),
            DomainEvent::LoanRejected(e) => serde_json::to_value(e),
            DomainEvent::LoanDisbursed(e) => serde_json::to_value(e),
            DomainEvent::PaymentCreated(e) => serde_json::to_value(e),
            DomainEvent::PaymentCompleted(e) => serde_json::to_value(e),
            DomainEvent::PaymentFailed(e) => serde_json::to_value(e),
        };
        value.map_err(|e| LendingError::InternalError(Box::new(e)))
    }

    fn from_data(event: &str, data: serde_json::Value) -> Result<Self> {
        fn payload<T: serde::de::DeserializeOwned>(
            event: &str,
            data: serde_json::Value,
        ) -> Result<T> {
            serde_json::from_value(data)
                .map_err(|e| LendingError::SchemaError(format!("{event}: {e}")))
        }

        Ok(match event {
            LOAN_APPLIED | LOAN_CREATED => DomainEvent::LoanApplied(payload(event, data)?),
            LOAN_APPROVED => DomainEvent::LoanApproved(payload(event, data)?),
            LOAN_REJECTED => DomainEvent::LoanRejected(payload(event, data)?),
            LOAN_DISBURSED => DomainEvent::LoanDisbursed(payload(event, data)?),
            PAYMENT_CREATED => DomainEvent::PaymentCreated(payload(event, data)?),
            PAYMENT_COMPLETED => DomainEvent::PaymentCompleted(payload(event, data)?),
            PAYMENT_FAILED => DomainEvent::PaymentFailed(payload(event, data)?),
            other => {
                return Err(LendingError::SchemaError(format!(
                    "unknown event kind '{other}'"
                )));
            }
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    version: u32,
    id: Uuid,
    exchange: String,
    event: String,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

/// An immutable, published fact.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event: DomainEvent,
    pub emitted_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            emitted_at: Utc::now(),
        }
    }

    pub fn exchange(&self) -> &'static str {
        self.event.exchange()
    }

    pub fn routing_key(&self) -> &'static str {
        self.event.routing_key()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireEnvelope {
            version: SCHEMA_VERSION,
            id: self.id,
            exchange: self.exchange().to_string(),
            event: self.routing_key().to_string(),
            data: self.event.data()?,
            timestamp: self.emitted_at,
        };
        serde_json::to_vec(&wire).map_err(|e| LendingError::InternalError(Box::new(e)))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| LendingError::SchemaError(format!("envelope: {e}")))?;
        if wire.version != SCHEMA_VERSION {
            return Err(LendingError::SchemaError(format!(
                "unsupported schema version {}",
                wire.version
            )));
        }
        let event = DomainEvent::from_data(&wire.event, wire.data)?;
        if event.exchange() != wire.exchange {
            return Err(LendingError::SchemaError(format!(
                "event '{}' does not belong to exchange '{}'",
                wire.event, wire.exchange
            )));
        }
        Ok(Self {
            id: wire.id,
            event,
            emitted_at: wire.timestamp,
        })
    }
}
