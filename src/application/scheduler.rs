use crate::application::consumer::EventHandler;
use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::installment::{Installment, InstallmentId, InstallmentStatus, build_schedule};
use crate::domain::loan::LoanId;
use crate::domain::money::{Amount, InterestRate};
use crate::domain::ports::{InstallmentStoreBox, ScheduleInsert};
use crate::error::{LendingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Created(Vec<Installment>),
    /// A schedule already existed for the loan and was returned unchanged.
    AlreadyExists(Vec<Installment>),
}

impl ScheduleOutcome {
    pub fn installments(&self) -> &[Installment] {
        match self {
            ScheduleOutcome::Created(rows) | ScheduleOutcome::AlreadyExists(rows) => rows,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ScheduleOutcome::Created(_))
    }
}

/// Materializes and tracks repayment schedules.
///
/// Also owns the paid status of each installment; payment settlement only
/// reports completions, which reach this service as `payment.completed`.
pub struct InstallmentScheduler {
    store: InstallmentStoreBox,
    default_interest_rate: InterestRate,
}

impl InstallmentScheduler {
    pub fn new(store: InstallmentStoreBox, default_interest_rate: InterestRate) -> Self {
        Self {
            store,
            default_interest_rate,
        }
    }

    /// Generates the schedule for `loan_id` unless one already exists.
    pub async fn generate_schedule(
        &self,
        loan_id: LoanId,
        borrower_id: &str,
        principal: Amount,
        rate: InterestRate,
        tenure_months: u32,
    ) -> Result<ScheduleOutcome> {
        let existing = self.store.by_loan(loan_id).await?;
        if !existing.is_empty() {
            debug!(%loan_id, "Schedule already exists");
            return Ok(ScheduleOutcome::AlreadyExists(existing));
        }

        let schedule = build_schedule(
            loan_id,
            borrower_id,
            principal,
            rate,
            tenure_months,
            Utc::now(),
        )?;

        match self.store.insert_schedule(loan_id, schedule).await? {
            ScheduleInsert::Created(rows) => {
                info!(%loan_id, installments = rows.len(), "Schedule generated");
                Ok(ScheduleOutcome::Created(rows))
            }
            ScheduleInsert::AlreadyExists(rows) => Ok(ScheduleOutcome::AlreadyExists(rows)),
        }
    }

    pub async fn get_schedule(&self, loan_id: LoanId) -> Result<Vec<Installment>> {
        self.store.by_loan(loan_id).await
    }

    pub async fn installments_by_borrower(&self, borrower_id: &str) -> Result<Vec<Installment>> {
        self.store.by_borrower(borrower_id).await
    }

    pub async fn get_installment(&self, id: InstallmentId) -> Result<Installment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LendingError::not_found("Installment", id))
    }

    /// Marks an installment paid. Paying an already-paid installment leaves
    /// it untouched.
    pub async fn record_installment_payment(
        &self,
        id: InstallmentId,
        paid_at: DateTime<Utc>,
    ) -> Result<Installment> {
        loop {
            let mut installment = self.get_installment(id).await?;
            let expected = installment.status;
            if !installment.mark_paid(paid_at) {
                return Ok(installment);
            }
            if self
                .store
                .update_if_status(installment.clone(), expected)
                .await?
            {
                info!(installment_id = %id, loan_id = %installment.loan_id, "Installment paid");
                return Ok(installment);
            }
            // Status moved under us (pending to overdue); re-read and retry.
            debug!(installment_id = %id, "Installment changed concurrently, retrying");
        }
    }

    /// Flags every pending installment due before `now` as overdue and
    /// returns the ones that changed. Rows settled after the scan are skipped.
    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Installment>> {
        let mut flagged = Vec::new();
        for mut installment in self.store.pending_due_before(now).await? {
            if !installment.mark_overdue(now) {
                continue;
            }
            if self
                .store
                .update_if_status(installment.clone(), InstallmentStatus::Pending)
                .await?
            {
                flagged.push(installment);
            } else {
                debug!(installment_id = %installment.id, "Installment settled before overdue sweep");
            }
        }
        if !flagged.is_empty() {
            warn!(count = flagged.len(), "Installments overdue");
        }
        Ok(flagged)
    }
}

/// Builds the schedule when a loan is approved.
pub struct LoanApprovedHandler {
    scheduler: Arc<InstallmentScheduler>,
}

impl LoanApprovedHandler {
    pub fn new(scheduler: Arc<InstallmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl EventHandler for LoanApprovedHandler {
    fn name(&self) -> &'static str {
        "emi-schedule"
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<()> {
        let DomainEvent::LoanApproved(approved) = envelope.event else {
            return Err(LendingError::SchemaError(format!(
                "expected loan.approved, got {}",
                envelope.event.routing_key()
            )));
        };
        let rate = approved
            .interest_rate
            .unwrap_or(self.scheduler.default_interest_rate);

        let outcome = self
            .scheduler
            .generate_schedule(
                approved.loan_id,
                &approved.user_id,
                approved.amount,
                rate,
                approved.tenure_months,
            )
            .await?;
        if !outcome.is_created() {
            info!(loan_id = %approved.loan_id, event_id = %envelope.id, "Duplicate approval ignored");
        }
        Ok(())
    }
}

/// Projects completed payments onto the installment they settle.
pub struct PaymentCompletedHandler {
    scheduler: Arc<InstallmentScheduler>,
}

impl PaymentCompletedHandler {
    pub fn new(scheduler: Arc<InstallmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl EventHandler for PaymentCompletedHandler {
    fn name(&self) -> &'static str {
        "emi-payment"
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<()> {
        let DomainEvent::PaymentCompleted(completed) = envelope.event else {
            return Err(LendingError::SchemaError(format!(
                "expected payment.completed, got {}",
                envelope.event.routing_key()
            )));
        };
        let Some(installment_id) = completed.emi_id else {
            debug!(payment_id = %completed.payment_id, "Payment not tied to an installment");
            return Ok(());
        };

        let installment = self.scheduler.get_installment(installment_id).await?;
        if installment.loan_id != completed.loan_id {
            return Err(LendingError::ValidationError(format!(
                "installment {installment_id} does not belong to loan {}",
                completed.loan_id
            )));
        }
        self.scheduler
            .record_installment_payment(installment_id, envelope.emitted_at)
            .await?;
        Ok(())
    }
}
