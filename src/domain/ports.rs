use super::installment::{Installment, InstallmentId, InstallmentStatus};
use super::loan::{Loan, LoanId, LoanStatus};
use super::messaging::SubscriptionBox;
use super::money::Amount;
use super::notification::Notification;
use super::payment::{Payment, PaymentId, PaymentStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn insert(&self, loan: Loan) -> Result<()>;
    async fn get(&self, id: LoanId) -> Result<Option<Loan>>;
    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>>;
    /// Stores `loan` only if the persisted copy is still in `expected` status.
    async fn update_if_status(&self, loan: Loan, expected: LoanStatus) -> Result<bool>;
}

pub enum ScheduleInsert {
    Created(Vec<Installment>),
    AlreadyExists(Vec<Installment>),
}

#[async_trait]
pub trait InstallmentStore: Send + Sync {
    /// Inserts the whole schedule unless one already exists for `loan_id`,
    /// in which case the existing rows are returned untouched.
    async fn insert_schedule(
        &self,
        loan_id: LoanId,
        installments: Vec<Installment>,
    ) -> Result<ScheduleInsert>;
    async fn get(&self, id: InstallmentId) -> Result<Option<Installment>>;
    /// Ordered by sequence.
    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Installment>>;
    /// Ordered by due date.
    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Installment>>;
    /// Writes `installment` only if the stored row is still in `expected`
    /// status. Returns `false` when another writer got there first.
    async fn update_if_status(
        &self,
        installment: Installment,
        expected: InstallmentStatus,
    ) -> Result<bool>;
    async fn pending_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Installment>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with a validation error when the order id is already taken.
    async fn insert(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn by_order_id(&self, order_id: &str) -> Result<Option<Payment>>;
    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Payment>>;
    async fn update_if_status(&self, payment: Payment, expected: PaymentStatus) -> Result<bool>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn append(&self, notification: Notification) -> Result<()>;
    async fn exists_for_event(&self, event_id: Uuid) -> Result<bool>;
    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Notification>>;
}

pub type LoanStoreBox = Box<dyn LoanStore>;
pub type InstallmentStoreBox = Box<dyn InstallmentStore>;
pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type NotificationStoreBox = Box<dyn NotificationStore>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub kyc_verified: bool,
}

/// Identity/KYC collaborator (`VerifyUser`, `GetUser`).
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn verify_user(&self, user_id: &str) -> Result<Verification>;
    async fn get_user(&self, user_id: &str) -> Result<UserProfile>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentInit {
    pub order_id: String,
    pub borrower_id: String,
    pub amount: Amount,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub session_id: String,
    pub payment_url: Option<String>,
    pub provider_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    /// Raw gateway status, e.g. `SUCCESS`, `FAILED`, `PENDING`.
    pub status: String,
    pub transaction_id: Option<String>,
    pub method: Option<String>,
}

/// Vendor payment capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_payment(&self, request: &PaymentInit) -> Result<PaymentHandle>;
    async fn payment_status(&self, order_id: &str) -> Result<GatewayStatus>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub success: bool,
    pub message: String,
}

/// Outbound communication capability.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<SendReceipt>;
    async fn send_email(&self, email: &str, subject: &str, body: &str) -> Result<SendReceipt>;
}

/// Durable topic publish/subscribe.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> Result<()>;
    /// Declares `queue` if needed, binds it to `exchange` with every pattern
    /// and attaches a new consumer to it.
    async fn bind(&self, queue: &str, exchange: &str, patterns: &[&str])
    -> Result<SubscriptionBox>;
    fn is_healthy(&self) -> bool;
}

pub type IdentityDirectoryRef = Arc<dyn IdentityDirectory>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type MessengerRef = Arc<dyn Messenger>;
pub type MessageBusRef = Arc<dyn MessageBus>;
