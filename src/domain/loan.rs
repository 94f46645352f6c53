use crate::domain::money::{Amount, InterestRate};
use crate::error::{LendingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type LoanId = Uuid;
pub type BorrowerId = String;

/// Fifty years.
pub const MAX_TENURE_MONTHS: u32 = 600;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Applied,
    Approved,
    Rejected,
    Disbursed,
    Paid,
    Defaulted,
}

impl LoanStatus {
    /// Edges of the lifecycle graph. Anything not listed here is illegal.
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Applied, Approved)
                | (Applied, Rejected)
                | (Approved, Disbursed)
                | (Disbursed, Paid)
                | (Disbursed, Defaulted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoanStatus::Rejected | LoanStatus::Paid | LoanStatus::Defaulted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Applied => "APPLIED",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Rejected => "REJECTED",
            LoanStatus::Disbursed => "DISBURSED",
            LoanStatus::Paid => "PAID",
            LoanStatus::Defaulted => "DEFAULTED",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loan as owned by the lifecycle service.
///
/// Status only ever moves along the edges accepted by
/// [`LoanStatus::can_transition_to`]; every mutator below goes through
/// [`Loan::transition`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub amount: Amount,
    pub interest_rate: InterestRate,
    pub tenure_months: u32,
    pub status: LoanStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Builds a new loan in `Applied` state after validating the request.
    pub fn apply(
        borrower_id: impl Into<BorrowerId>,
        amount: Decimal,
        tenure_months: u32,
        interest_rate: Decimal,
    ) -> Result<Self> {
        let borrower_id = borrower_id.into();
        if borrower_id.trim().is_empty() {
            return Err(LendingError::ValidationError(
                "Borrower id must not be empty".to_string(),
            ));
        }
        if tenure_months < 1 {
            return Err(LendingError::ValidationError(
                "Tenure must be at least one month".to_string(),
            ));
        }
        if tenure_months > MAX_TENURE_MONTHS {
            return Err(LendingError::ValidationError(format!(
                "Tenure must not exceed {MAX_TENURE_MONTHS} months"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            borrower_id,
            amount: Amount::new(amount)?,
            interest_rate: InterestRate::new(interest_rate)?,
            tenure_months,
            status: LoanStatus::Applied,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn transition(&mut self, next: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LendingError::invalid_transition("Loan", self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn approve(&mut self) -> Result<()> {
        self.transition(LoanStatus::Approved)
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(LoanStatus::Rejected)?;
        self.rejection_reason = Some(reason.into());
        Ok(())
    }

    pub fn disburse(&mut self) -> Result<()> {
        self.transition(LoanStatus::Disbursed)
    }

    pub fn mark_repaid(&mut self) -> Result<()> {
        self.transition(LoanStatus::Paid)
    }

    pub fn mark_defaulted(&mut self) -> Result<()> {
        self.transition(LoanStatus::Defaulted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn applied() -> Loan {
        Loan::apply("U1", dec!(50000), 6, dec!(12)).unwrap()
    }

    #[test]
    fn test_apply_validation() {
        assert!(matches!(
            Loan::apply("U1", dec!(0), 6, dec!(12)),
            Err(LendingError::ValidationError(_))
        ));
        assert!(matches!(
            Loan::apply("U1", dec!(1000), 0, dec!(12)),
            Err(LendingError::ValidationError(_))
        ));
        assert!(matches!(
            Loan::apply("U1", dec!(1000), MAX_TENURE_MONTHS + 1, dec!(12)),
            Err(LendingError::ValidationError(_))
        ));
        assert!(matches!(
            Loan::apply("U1", dec!(1000), u32::MAX, dec!(12)),
            Err(LendingError::ValidationError(_))
        ));
        assert!(Loan::apply("U1", dec!(1000), MAX_TENURE_MONTHS, dec!(12)).is_ok());
        assert!(matches!(
            Loan::apply("U1", dec!(1000), 6, dec!(-1)),
            Err(LendingError::ValidationError(_))
        ));
        assert!(matches!(
            Loan::apply("  ", dec!(1000), 6, dec!(10)),
            Err(LendingError::ValidationError(_))
        ));

        let loan = applied();
        assert_eq!(loan.status, LoanStatus::Applied);
        assert_eq!(loan.created_at, loan.updated_at);
    }

    #[test]
    fn test_transition_graph() {
        use LoanStatus::*;
        let all = [Applied, Approved, Rejected, Disbursed, Paid, Defaulted];
        let legal = [
            (Applied, Approved),
            (Applied, Rejected),
            (Approved, Disbursed),
            (Disbursed, Paid),
            (Disbursed, Defaulted),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        for terminal in [Rejected, Paid, Defaulted] {
            assert!(terminal.is_terminal());
            assert!(all.iter().all(|next| !terminal.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_reject_records_reason() {
        let mut loan = applied();
        loan.reject("Insufficient income").unwrap();
        assert_eq!(loan.status, LoanStatus::Rejected);
        assert_eq!(loan.rejection_reason.as_deref(), Some("Insufficient income"));
    }

    #[test]
    fn test_approve_twice_fails() {
        let mut loan = applied();
        loan.approve().unwrap();
        let err = loan.approve().unwrap_err();
        assert!(matches!(err, LendingError::InvalidStateTransition { .. }));
        assert_eq!(loan.status, LoanStatus::Approved);
    }

    #[test]
    fn test_failed_reject_keeps_reason_empty() {
        let mut loan = applied();
        loan.approve().unwrap();
        assert!(loan.reject("late").is_err());
        assert!(loan.rejection_reason.is_none());
    }

    #[test]
    fn test_full_happy_path() {
        let mut loan = applied();
        loan.approve().unwrap();
        loan.disburse().unwrap();
        loan.mark_repaid().unwrap();
        assert_eq!(loan.status, LoanStatus::Paid);
        assert!(loan.mark_defaulted().is_err());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&LoanStatus::Approved).unwrap(),
            "\"APPROVED\""
        );
        assert_eq!(LoanStatus::Defaulted.to_string(), "DEFAULTED");
    }
}
