use crate::domain::installment::{Installment, InstallmentId, InstallmentStatus};
use crate::domain::loan::{Loan, LoanId, LoanStatus};
use crate::domain::notification::Notification;
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{
    InstallmentStore, LoanStore, NotificationStore, PaymentStore, ScheduleInsert,
};
use crate::error::{LendingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for loans.
///
/// Uses `Arc<RwLock<HashMap<LoanId, Loan>>>` to allow shared concurrent access.
/// Conditional updates check and write under the same write lock.
#[derive(Default, Clone)]
pub struct InMemoryLoanStore {
    loans: Arc<RwLock<HashMap<LoanId, Loan>>>,
}

impl InMemoryLoanStore {
    /// Creates a new, empty in-memory loan store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn insert(&self, loan: Loan) -> Result<()> {
        let mut loans = self.loans.write().await;
        loans.insert(loan.id, loan);
        Ok(())
    }

    async fn get(&self, id: LoanId) -> Result<Option<Loan>> {
        let loans = self.loans.read().await;
        Ok(loans.get(&id).cloned())
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>> {
        let loans = self.loans.read().await;
        let mut found: Vec<Loan> = loans
            .values()
            .filter(|loan| loan.borrower_id == borrower_id)
            .cloned()
            .collect();
        found.sort_by_key(|loan| loan.created_at);
        Ok(found)
    }

    async fn update_if_status(&self, loan: Loan, expected: LoanStatus) -> Result<bool> {
        let mut loans = self.loans.write().await;
        match loans.get(&loan.id) {
            Some(current) if current.status == expected => {
                loans.insert(loan.id, loan);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Loan", loan.id)),
        }
    }
}

/// A thread-safe in-memory store for installments.
///
/// Installments are keyed by id; the per-loan index makes the schedule
/// existence check and the insert a single step.
#[derive(Default, Clone)]
pub struct InMemoryInstallmentStore {
    inner: Arc<RwLock<InstallmentTables>>,
}

#[derive(Default)]
struct InstallmentTables {
    installments: HashMap<InstallmentId, Installment>,
    by_loan: HashMap<LoanId, Vec<InstallmentId>>,
}

impl InstallmentTables {
    fn schedule(&self, loan_id: LoanId) -> Vec<Installment> {
        let mut rows: Vec<Installment> = self
            .by_loan
            .get(&loan_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.installments.get(id).cloned())
            .collect();
        rows.sort_by_key(|i| i.sequence);
        rows
    }
}

impl InMemoryInstallmentStore {
    /// Creates a new, empty in-memory installment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallmentStore for InMemoryInstallmentStore {
    async fn insert_schedule(
        &self,
        loan_id: LoanId,
        installments: Vec<Installment>,
    ) -> Result<ScheduleInsert> {
        let mut tables = self.inner.write().await;
        if tables.by_loan.get(&loan_id).is_some_and(|ids| !ids.is_empty()) {
            return Ok(ScheduleInsert::AlreadyExists(tables.schedule(loan_id)));
        }
        let ids = installments.iter().map(|i| i.id).collect();
        tables.by_loan.insert(loan_id, ids);
        for installment in &installments {
            tables
                .installments
                .insert(installment.id, installment.clone());
        }
        Ok(ScheduleInsert::Created(installments))
    }

    async fn get(&self, id: InstallmentId) -> Result<Option<Installment>> {
        let tables = self.inner.read().await;
        Ok(tables.installments.get(&id).cloned())
    }

    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Installment>> {
        let tables = self.inner.read().await;
        Ok(tables.schedule(loan_id))
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Installment>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Installment> = tables
            .installments
            .values()
            .filter(|i| i.borrower_id == borrower_id)
            .cloned()
            .collect();
        rows.sort_by_key(|i| (i.due_date, i.sequence));
        Ok(rows)
    }

    async fn update_if_status(
        &self,
        installment: Installment,
        expected: InstallmentStatus,
    ) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.installments.get(&installment.id) {
            Some(current) if current.status == expected => {
                tables.installments.insert(installment.id, installment);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Installment", installment.id)),
        }
    }

    async fn pending_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Installment>> {
        let tables = self.inner.read().await;
        Ok(tables
            .installments
            .values()
            .filter(|i| i.status == InstallmentStatus::Pending && i.due_date < now)
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory store for payments, indexed by order id.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    inner: Arc<RwLock<PaymentTables>>,
}

#[derive(Default)]
struct PaymentTables {
    payments: HashMap<PaymentId, Payment>,
    by_order: HashMap<String, PaymentId>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let mut tables = self.inner.write().await;
        if tables.by_order.contains_key(&payment.order_id) {
            return Err(LendingError::ValidationError(format!(
                "Duplicate order id {}",
                payment.order_id
            )));
        }
        tables.by_order.insert(payment.order_id.clone(), payment.id);
        tables.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.inner.read().await;
        Ok(tables.payments.get(&id).cloned())
    }

    async fn by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        let tables = self.inner.read().await;
        Ok(tables
            .by_order
            .get(order_id)
            .and_then(|id| tables.payments.get(id))
            .cloned())
    }

    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Payment>> {
        let tables = self.inner.read().await;
        let mut rows: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn update_if_status(&self, payment: Payment, expected: PaymentStatus) -> Result<bool> {
        let mut tables = self.inner.write().await;
        match tables.payments.get(&payment.id) {
            Some(current) if current.status == expected => {
                tables.payments.insert(payment.id, payment);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Payment", payment.id)),
        }
    }
}

/// Append-only in-memory audit log of notifications.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationStore {
    /// Creates a new, empty in-memory notification store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn append(&self, notification: Notification) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        notifications.push(notification);
        Ok(())
    }

    async fn exists_for_event(&self, event_id: Uuid) -> Result<bool> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().any(|n| n.source_event == event_id))
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Notification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|n| n.borrower_id == borrower_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::installment::build_schedule;
    use crate::domain::money::{Amount, InterestRate};
    use crate::domain::notification::{Channel, DeliveryStatus};
    use rust_decimal_macros::dec;

    fn schedule(loan_id: LoanId, months: u32) -> Vec<Installment> {
        build_schedule(
            loan_id,
            "U1",
            Amount::new(dec!(1200)).unwrap(),
            InterestRate::ZERO,
            months,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_loan_store() {
        let store = InMemoryLoanStore::new();
        let loan = Loan::apply("U1", dec!(1000), 3, dec!(10)).unwrap();

        store.insert(loan.clone()).await.unwrap();
        let retrieved = store.get(loan.id).await.unwrap().unwrap();
        assert_eq!(retrieved, loan);

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.by_borrower("U1").await.unwrap().len(), 1);
        assert!(store.by_borrower("U2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loan_conditional_update() {
        let store = InMemoryLoanStore::new();
        let loan = Loan::apply("U1", dec!(1000), 3, dec!(10)).unwrap();
        store.insert(loan.clone()).await.unwrap();

        let mut approved = loan.clone();
        approved.approve().unwrap();
        assert!(
            store
                .update_if_status(approved.clone(), LoanStatus::Applied)
                .await
                .unwrap()
        );

        // A racing writer that still believes the loan is applied loses.
        let mut rejected = loan;
        rejected.reject("late").unwrap();
        assert!(
            !store
                .update_if_status(rejected, LoanStatus::Applied)
                .await
                .unwrap()
        );
        assert_eq!(
            store.get(approved.id).await.unwrap().unwrap().status,
            LoanStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_schedule_inserted_once() {
        let store = InMemoryInstallmentStore::new();
        let loan_id = Uuid::new_v4();
        let first = schedule(loan_id, 3);

        assert!(matches!(
            store.insert_schedule(loan_id, first.clone()).await.unwrap(),
            ScheduleInsert::Created(_)
        ));
        match store
            .insert_schedule(loan_id, schedule(loan_id, 3))
            .await
            .unwrap()
        {
            ScheduleInsert::AlreadyExists(existing) => assert_eq!(existing, first),
            ScheduleInsert::Created(_) => panic!("schedule created twice"),
        }
        assert_eq!(store.by_loan(loan_id).await.unwrap().len(), 3);
        assert_eq!(store.by_borrower("U1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_installment_conditional_update_and_due_query() {
        let store = InMemoryInstallmentStore::new();
        let loan_id = Uuid::new_v4();
        let rows = schedule(loan_id, 2);
        store.insert_schedule(loan_id, rows.clone()).await.unwrap();

        let far_future = rows[1].due_date + chrono::Duration::days(1);
        assert_eq!(store.pending_due_before(far_future).await.unwrap().len(), 2);

        let mut paid = rows[0].clone();
        paid.mark_paid(Utc::now());
        assert!(
            store
                .update_if_status(paid, InstallmentStatus::Pending)
                .await
                .unwrap()
        );
        assert_eq!(store.pending_due_before(far_future).await.unwrap().len(), 1);

        let mut overdue = rows[0].clone();
        overdue.mark_overdue(far_future);
        assert!(
            !store
                .update_if_status(overdue, InstallmentStatus::Pending)
                .await
                .unwrap()
        );
        assert_eq!(
            store.get(rows[0].id).await.unwrap().unwrap().status,
            InstallmentStatus::Paid
        );

        let stranger = schedule(Uuid::new_v4(), 1).remove(0);
        assert!(matches!(
            store
                .update_if_status(stranger, InstallmentStatus::Pending)
                .await,
            Err(LendingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_payment_store_order_index() {
        let store = InMemoryPaymentStore::new();
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id: "ORDER_AAAA0001".into(),
            borrower_id: "U1".into(),
            loan_id: Uuid::new_v4(),
            installment_id: None,
            amount: Amount::new(dec!(10)).unwrap(),
            currency: "INR".into(),
            status: PaymentStatus::Pending,
            method: None,
            provider: "CASHFREE".into(),
            provider_reference: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert(payment.clone()).await.unwrap();

        let found = store.by_order_id("ORDER_AAAA0001").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
        assert!(matches!(
            store.insert(payment.clone()).await,
            Err(LendingError::ValidationError(_))
        ));

        let mut completed = payment.clone();
        completed.settle(PaymentStatus::Completed, Some("TX".into()), None);
        assert!(
            store
                .update_if_status(completed.clone(), PaymentStatus::Pending)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_if_status(completed, PaymentStatus::Pending)
                .await
                .unwrap()
        );
        assert_eq!(store.by_loan(payment.loan_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_log() {
        let store = InMemoryNotificationStore::new();
        let event = Uuid::new_v4();
        let record = Notification::record(
            "U1",
            event,
            Channel::Sms,
            serde_json::json!({ "message": "hi" }),
            Err("gateway down".into()),
        );
        store.append(record).await.unwrap();

        assert!(store.exists_for_event(event).await.unwrap());
        assert!(!store.exists_for_event(Uuid::new_v4()).await.unwrap());
        let rows = store.by_borrower("U1").await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Failed);
        assert_eq!(rows[0].error_message.as_deref(), Some("gateway down"));
    }
}
