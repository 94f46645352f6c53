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
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for storing loans.
pub const CF_LOANS: &str = "loans";
/// Column Family for storing installments.
pub const CF_INSTALLMENTS: &str = "installments";
/// Column Family for storing payments.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping order ids to payment ids.
pub const CF_PAYMENT_ORDERS: &str = "payment_orders";
/// Column Family for the notification audit log.
pub const CF_NOTIFICATIONS: &str = "notifications";

const COLUMN_FAMILIES: [&str; 5] = [
    CF_LOANS,
    CF_INSTALLMENTS,
    CF_PAYMENTS,
    CF_PAYMENT_ORDERS,
    CF_NOTIFICATIONS,
];

/// A persistent store implementation using RocksDB.
///
/// Handles storage for every entity using separate Column Families, with
/// values encoded as JSON and keys as raw UUID bytes. Read-check-write
/// sequences (conditional updates, schedule insertion, order uniqueness) are
/// serialized through a single write lock.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every required column family exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LendingError::PersistenceFailure(format!("{name} column family not found"))
        })
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| LendingError::PersistenceFailure(format!("Serialization error: {e}")))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| LendingError::PersistenceFailure(format!("Deserialization error: {e}")))
    }

    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.put_cf(handle, key, Self::encode(value)?)?;
        Ok(())
    }

    fn fetch<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(Self::decode(&value)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl LoanStore for RocksDBStore {
    async fn insert(&self, loan: Loan) -> Result<()> {
        self.put(CF_LOANS, loan.id.as_bytes(), &loan)
    }

    async fn get(&self, id: LoanId) -> Result<Option<Loan>> {
        self.fetch(CF_LOANS, id.as_bytes())
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .scan::<Loan>(CF_LOANS)?
            .into_iter()
            .filter(|loan| loan.borrower_id == borrower_id)
            .collect();
        loans.sort_by_key(|loan| loan.created_at);
        Ok(loans)
    }

    async fn update_if_status(&self, loan: Loan, expected: LoanStatus) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current: Option<Loan> = self.fetch(CF_LOANS, loan.id.as_bytes())?;
        match current {
            Some(current) if current.status == expected => {
                self.put(CF_LOANS, loan.id.as_bytes(), &loan)?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Loan", loan.id)),
        }
    }
}

#[async_trait]
impl InstallmentStore for RocksDBStore {
    async fn insert_schedule(
        &self,
        loan_id: LoanId,
        installments: Vec<Installment>,
    ) -> Result<ScheduleInsert> {
        let _guard = self.write_lock.lock().await;
        let existing = InstallmentStore::by_loan(self, loan_id).await?;
        if !existing.is_empty() {
            return Ok(ScheduleInsert::AlreadyExists(existing));
        }

        let handle = self.cf(CF_INSTALLMENTS)?;
        let mut batch = WriteBatch::default();
        for installment in &installments {
            batch.put_cf(handle, installment.id.as_bytes(), Self::encode(installment)?);
        }
        self.db.write(batch)?;
        Ok(ScheduleInsert::Created(installments))
    }

    async fn get(&self, id: InstallmentId) -> Result<Option<Installment>> {
        self.fetch(CF_INSTALLMENTS, id.as_bytes())
    }

    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Installment>> {
        let mut rows: Vec<Installment> = self
            .scan::<Installment>(CF_INSTALLMENTS)?
            .into_iter()
            .filter(|i| i.loan_id == loan_id)
            .collect();
        rows.sort_by_key(|i| i.sequence);
        Ok(rows)
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Installment>> {
        let mut rows: Vec<Installment> = self
            .scan::<Installment>(CF_INSTALLMENTS)?
            .into_iter()
            .filter(|i| i.borrower_id == borrower_id)
            .collect();
        rows.sort_by_key(|i| (i.due_date, i.sequence));
        Ok(rows)
    }

    async fn update_if_status(
        &self,
        installment: Installment,
        expected: InstallmentStatus,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current: Option<Installment> =
            self.fetch(CF_INSTALLMENTS, installment.id.as_bytes())?;
        match current {
            Some(current) if current.status == expected => {
                self.put(CF_INSTALLMENTS, installment.id.as_bytes(), &installment)?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Installment", installment.id)),
        }
    }

    async fn pending_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Installment>> {
        Ok(self
            .scan::<Installment>(CF_INSTALLMENTS)?
            .into_iter()
            .filter(|i| i.status == InstallmentStatus::Pending && i.due_date < now)
            .collect())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: Payment) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let orders = self.cf(CF_PAYMENT_ORDERS)?;
        if self
            .db
            .get_pinned_cf(orders, payment.order_id.as_bytes())?
            .is_some()
        {
            return Err(LendingError::ValidationError(format!(
                "Duplicate order id {}",
                payment.order_id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(orders, payment.order_id.as_bytes(), payment.id.as_bytes());
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_bytes(),
            Self::encode(&payment)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.fetch(CF_PAYMENTS, id.as_bytes())
    }

    async fn by_order_id(&self, order_id: &str) -> Result<Option<Payment>> {
        let orders = self.cf(CF_PAYMENT_ORDERS)?;
        let Some(id_bytes) = self.db.get_cf(orders, order_id.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes)
            .map_err(|e| LendingError::PersistenceFailure(format!("Corrupt order index: {e}")))?;
        self.fetch(CF_PAYMENTS, id.as_bytes())
    }

    async fn by_loan(&self, loan_id: LoanId) -> Result<Vec<Payment>> {
        let mut rows: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| p.loan_id == loan_id)
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn update_if_status(&self, payment: Payment, expected: PaymentStatus) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let current: Option<Payment> = self.fetch(CF_PAYMENTS, payment.id.as_bytes())?;
        match current {
            Some(current) if current.status == expected => {
                self.put(CF_PAYMENTS, payment.id.as_bytes(), &payment)?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LendingError::not_found("Payment", payment.id)),
        }
    }
}

#[async_trait]
impl NotificationStore for RocksDBStore {
    async fn append(&self, notification: Notification) -> Result<()> {
        self.put(
            CF_NOTIFICATIONS,
            notification.id.as_bytes(),
            &notification,
        )
    }

    async fn exists_for_event(&self, event_id: Uuid) -> Result<bool> {
        Ok(self
            .scan::<Notification>(CF_NOTIFICATIONS)?
            .iter()
            .any(|n| n.source_event == event_id))
    }

    async fn by_borrower(&self, borrower_id: &str) -> Result<Vec<Notification>> {
        let mut rows: Vec<Notification> = self
            .scan::<Notification>(CF_NOTIFICATIONS)?
            .into_iter()
            .filter(|n| n.borrower_id == borrower_id)
            .collect();
        rows.sort_by_key(|n| n.created_at);
        Ok(rows)
    }
}
