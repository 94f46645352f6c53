use crate::application::outbox::EventPublisher;
use crate::domain::events::{DomainEvent, LoanApplied, LoanApproved, LoanDisbursed, LoanRejected};
use crate::domain::loan::{Loan, LoanId, LoanStatus};
use crate::domain::ports::{IdentityDirectoryRef, LoanStoreBox, MessageBusRef};
use crate::error::{LendingError, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Loan lifecycle state machine.
///
/// Owns the loan store. Every transition is a conditional write against the
/// status the loan was read in, so two concurrent callers can never both move
/// the same loan (and never both publish the resulting event).
pub struct LoanService {
    store: LoanStoreBox,
    identity: IdentityDirectoryRef,
    events: EventPublisher,
}

impl LoanService {
    /// Creates a new `LoanService`.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for loans.
    /// * `identity` - KYC collaborator consulted before a loan is created.
    /// * `bus` - Where lifecycle events are published.
    pub fn new(store: LoanStoreBox, identity: IdentityDirectoryRef, bus: MessageBusRef) -> Self {
        Self {
            store,
            identity,
            events: EventPublisher::new("loan-service", bus),
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Verifies the borrower, stores a new `Applied` loan and announces it.
    ///
    /// Nothing is stored when the borrower is unverified or the identity
    /// service cannot be reached.
    pub async fn apply_loan(
        &self,
        borrower_id: &str,
        amount: Decimal,
        tenure_months: u32,
        interest_rate: Decimal,
    ) -> Result<Loan> {
        let loan = Loan::apply(borrower_id, amount, tenure_months, interest_rate)?;

        let verification = self.identity.verify_user(borrower_id).await.map_err(|e| {
            warn!(borrower_id, error = %e, "Borrower verification unavailable");
            LendingError::VerificationFailed(format!("verification call failed: {e}"))
        })?;
        if !verification.success {
            info!(borrower_id, reason = %verification.message, "Borrower not verified");
            return Err(LendingError::VerificationFailed(verification.message));
        }

        self.store.insert(loan.clone()).await?;
        info!(loan_id = %loan.id, borrower_id, amount = %loan.amount, "Loan applied");

        self.events
            .publish(DomainEvent::LoanApplied(LoanApplied {
                loan_id: loan.id,
                user_id: loan.borrower_id.clone(),
                amount: loan.amount,
                loan_type: None,
            }))
            .await?;
        Ok(loan)
    }

    pub async fn approve_loan(&self, id: LoanId) -> Result<Loan> {
        let loan = self.transition(id, Loan::approve).await?;
        info!(loan_id = %id, "Loan approved");
        self.events
            .publish(DomainEvent::LoanApproved(LoanApproved {
                loan_id: loan.id,
                user_id: loan.borrower_id.clone(),
                amount: loan.amount,
                interest_rate: Some(loan.interest_rate),
                tenure_months: loan.tenure_months,
            }))
            .await?;
        Ok(loan)
    }

    pub async fn reject_loan(&self, id: LoanId, reason: &str) -> Result<Loan> {
        let loan = self.transition(id, |loan| loan.reject(reason)).await?;
        info!(loan_id = %id, reason, "Loan rejected");
        self.events
            .publish(DomainEvent::LoanRejected(LoanRejected {
                loan_id: loan.id,
                user_id: loan.borrower_id.clone(),
                reason: reason.to_string(),
            }))
            .await?;
        Ok(loan)
    }

    pub async fn disburse_loan(&self, id: LoanId) -> Result<Loan> {
        let loan = self.transition(id, Loan::disburse).await?;
        info!(loan_id = %id, "Loan disbursed");
        self.events
            .publish(DomainEvent::LoanDisbursed(LoanDisbursed {
                loan_id: loan.id,
                user_id: loan.borrower_id.clone(),
                amount: loan.amount,
            }))
            .await?;
        Ok(loan)
    }

    pub async fn mark_repaid(&self, id: LoanId) -> Result<Loan> {
        let loan = self.transition(id, Loan::mark_repaid).await?;
        info!(loan_id = %id, "Loan repaid");
        Ok(loan)
    }

    pub async fn mark_defaulted(&self, id: LoanId) -> Result<Loan> {
        let loan = self.transition(id, Loan::mark_defaulted).await?;
        warn!(loan_id = %id, "Loan defaulted");
        Ok(loan)
    }

    pub async fn get_loan(&self, id: LoanId) -> Result<Loan> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LendingError::not_found("Loan", id))
    }

    pub async fn loans_by_borrower(&self, borrower_id: &str) -> Result<Vec<Loan>> {
        self.store.by_borrower(borrower_id).await
    }

    async fn transition<F>(&self, id: LoanId, apply: F) -> Result<Loan>
    where
        F: FnOnce(&mut Loan) -> Result<()>,
    {
        let mut loan = self.get_loan(id).await?;
        let expected = loan.status;
        apply(&mut loan)?;

        if self.store.update_if_status(loan.clone(), expected).await? {
            return Ok(loan);
        }

        // Lost a race: report against the status that won.
        let current: LoanStatus = self.get_loan(id).await?.status;
        Err(LendingError::invalid_transition("Loan", current, loan.status))
    }
}
