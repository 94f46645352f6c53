use crate::domain::installment::InstallmentId;
use crate::domain::loan::{BorrowerId, LoanId};
use crate::domain::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type PaymentId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// Status vocabulary reported by the payment gateway, either through a
/// settlement callback or a status poll.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ReportedStatus {
    Success,
    Failed,
    Other(String),
}

impl ReportedStatus {
    /// Exact match only; any other spelling is a non-terminal report.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESS" => ReportedStatus::Success,
            "FAILED" => ReportedStatus::Failed,
            _ => ReportedStatus::Other(raw.to_string()),
        }
    }

    /// The terminal payment status this report leads to, if any.
    pub fn target(&self) -> Option<PaymentStatus> {
        match self {
            ReportedStatus::Success => Some(PaymentStatus::Completed),
            ReportedStatus::Failed => Some(PaymentStatus::Failed),
            ReportedStatus::Other(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    /// External order reference handed to the gateway. Unique.
    pub order_id: String,
    pub borrower_id: BorrowerId,
    pub loan_id: LoanId,
    pub installment_id: Option<InstallmentId>,
    pub amount: Amount,
    pub currency: String,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub provider: String,
    pub provider_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Generates an order reference of the form `ORDER_1A2B3C4D`.
    pub fn new_order_id() -> String {
        let simple = Uuid::new_v4().simple().to_string();
        format!("ORDER_{}", simple[..8].to_ascii_uppercase())
    }

    /// Moves a pending payment to a terminal status. Returns `false` when the
    /// payment was already terminal, leaving it untouched.
    pub fn settle(
        &mut self,
        status: PaymentStatus,
        transaction_id: Option<String>,
        method: Option<String>,
    ) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.transaction_id = transaction_id;
        self.method = method;
        self.updated_at = Utc::now();
        true
    }
}
