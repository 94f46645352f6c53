use crate::domain::loan::{BorrowerId, LoanId, MAX_TENURE_MONTHS};
use crate::domain::money::{Amount, InterestRate};
use crate::error::{LendingError, Result};
use chrono::{DateTime, Months, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type InstallmentId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

/// One scheduled repayment (EMI) of a loan.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    /// 1-based position in the schedule.
    pub sequence: u32,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    pub status: InstallmentStatus,
    pub payment_date: Option<DateTime<Utc>>,
    pub penalty_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Installment {
    /// Marks the installment paid. Returns `false` when it already was.
    pub fn mark_paid(&mut self, paid_at: DateTime<Utc>) -> bool {
        if self.status == InstallmentStatus::Paid {
            return false;
        }
        self.status = InstallmentStatus::Paid;
        self.payment_date = Some(paid_at);
        true
    }

    /// Flags a pending installment whose due date has passed.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == InstallmentStatus::Pending && self.due_date < now {
            self.status = InstallmentStatus::Overdue;
            true
        } else {
            false
        }
    }
}

/// Reducing-balance EMI: `P * r * (1+r)^n / ((1+r)^n - 1)` with `r` the monthly
/// rate, rounded half away from zero to 2 places. A zero rate splits the
/// principal evenly and is left unrounded.
pub fn monthly_installment(
    principal: Amount,
    rate: InterestRate,
    tenure_months: u32,
) -> Result<Amount> {
    if tenure_months == 0 {
        return Err(LendingError::ValidationError(
            "Tenure must be at least one month".to_string(),
        ));
    }
    if tenure_months > MAX_TENURE_MONTHS {
        return Err(LendingError::ValidationError(format!(
            "Tenure must not exceed {MAX_TENURE_MONTHS} months"
        )));
    }
    let p = principal.value();
    let n = Decimal::from(tenure_months);
    if rate.is_zero() {
        return Amount::new(p / n);
    }

    let r = rate.monthly_fraction();
    let growth = (0..tenure_months).try_fold(Decimal::ONE, |acc, _| {
        acc.checked_mul(Decimal::ONE + r)
    });
    let overflow = || LendingError::ValidationError("Installment computation overflow".to_string());
    let growth = growth.ok_or_else(overflow)?;

    let numerator = p
        .checked_mul(r)
        .and_then(|v| v.checked_mul(growth))
        .ok_or_else(overflow)?;
    let emi = numerator
        .checked_div(growth - Decimal::ONE)
        .ok_or_else(overflow)?;

    Amount::new(emi.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Materializes the full schedule for a loan: `tenure_months` pending
/// installments due at +1..=+n months from `generated_at`.
pub fn build_schedule(
    loan_id: LoanId,
    borrower_id: &str,
    principal: Amount,
    rate: InterestRate,
    tenure_months: u32,
    generated_at: DateTime<Utc>,
) -> Result<Vec<Installment>> {
    let amount = monthly_installment(principal, rate, tenure_months)?;

    (1..=tenure_months)
        .map(|sequence| {
            let due_date = generated_at
                .checked_add_months(Months::new(sequence))
                .ok_or_else(|| {
                    LendingError::ValidationError("Due date out of range".to_string())
                })?;
            Ok(Installment {
                id: Uuid::new_v4(),
                loan_id,
                borrower_id: borrower_id.to_string(),
                sequence,
                amount,
                due_date,
                status: InstallmentStatus::Pending,
                payment_date: None,
                penalty_amount: Decimal::ZERO,
                created_at: generated_at,
            })
        })
        .collect()
}
