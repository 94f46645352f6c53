use crate::application::platform::LendingPlatform;
use crate::domain::installment::InstallmentStatus;
use crate::domain::loan::LoanId;
use crate::error::{LendingError, Result};
use crate::interfaces::csv::command_reader::{CommandKind, ScriptCommand};
use crate::interfaces::csv::report_writer::LoanReportRow;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Drives a [`LendingPlatform`] from scripted commands, keeping the
/// script's own names for the loans and payments it creates.
pub struct ScenarioRunner<'a> {
    platform: &'a LendingPlatform,
    default_rate: Decimal,
    loans: Vec<(String, LoanId)>,
    payments: HashMap<String, String>,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(platform: &'a LendingPlatform, default_rate: Decimal) -> Self {
        Self {
            platform,
            default_rate,
            loans: Vec::new(),
            payments: HashMap::new(),
        }
    }

    /// Runs one command and waits for every event it caused to be consumed.
    pub async fn execute(&mut self, command: ScriptCommand) -> Result<()> {
        debug!(?command, "Executing scripted command");
        let result = self.dispatch(command).await;
        self.platform.wait_idle().await;
        result
    }

    async fn dispatch(&mut self, command: ScriptCommand) -> Result<()> {
        match command.command {
            CommandKind::Apply => {
                let reference = ScriptCommand::require(&command.reference, "ref")?.to_string();
                if self.loans.iter().any(|(r, _)| *r == reference) {
                    return Err(LendingError::ValidationError(format!(
                        "loan reference '{reference}' already used"
                    )));
                }
                let borrower = ScriptCommand::require(&command.borrower, "borrower")?;
                let amount = command.amount.ok_or_else(|| missing("amount"))?;
                let tenure = command.tenure.ok_or_else(|| missing("tenure"))?;
                let rate = command.rate.unwrap_or(self.default_rate);

                let loan = self
                    .platform
                    .loans()
                    .apply_loan(borrower, amount, tenure, rate)
                    .await?;
                self.loans.push((reference, loan.id));
            }
            CommandKind::Approve => {
                let id = self.loan_id(&command)?;
                self.platform.loans().approve_loan(id).await?;
            }
            CommandKind::Reject => {
                let id = self.loan_id(&command)?;
                let reason = command.detail.as_deref().unwrap_or("Rejected");
                self.platform.loans().reject_loan(id, reason).await?;
            }
            CommandKind::Disburse => {
                let id = self.loan_id(&command)?;
                self.platform.loans().disburse_loan(id).await?;
            }
            CommandKind::Pay => {
                let reference = ScriptCommand::require(&command.reference, "ref")?.to_string();
                let id = self.loan_id(&command)?;
                let loan = self.platform.loans().get_loan(id).await?;
                let schedule = self.platform.scheduler().get_schedule(id).await?;

                let installment = match command.detail.as_deref().filter(|d| !d.is_empty()) {
                    Some(sequence) => {
                        let sequence: u32 = sequence.parse().map_err(|_| {
                            LendingError::ValidationError(format!(
                                "invalid installment number '{sequence}'"
                            ))
                        })?;
                        Some(
                            schedule
                                .iter()
                                .find(|i| i.sequence == sequence)
                                .ok_or_else(|| {
                                    LendingError::not_found("Installment", sequence)
                                })?,
                        )
                    }
                    None => schedule
                        .iter()
                        .find(|i| i.status != InstallmentStatus::Paid),
                };
                let amount = command
                    .amount
                    .or(installment.map(|i| i.amount.value()))
                    .ok_or_else(|| missing("amount"))?;

                let intent = self
                    .platform
                    .settlement()
                    .initiate_payment(&loan.borrower_id, id, amount, installment.map(|i| i.id))
                    .await?;
                self.payments.insert(reference, intent.payment.order_id);
            }
            CommandKind::Settle => {
                let reference = ScriptCommand::require(&command.reference, "ref")?;
                let order_id = self.order_id(reference)?;
                let status = command
                    .detail
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .unwrap_or("SUCCESS");
                self.platform
                    .settlement()
                    .handle_settlement_callback(
                        &order_id,
                        status,
                        Some(format!("TX_{reference}")),
                        Some("UPI".to_string()),
                    )
                    .await?;
            }
            CommandKind::Reconcile => {
                let reference = ScriptCommand::require(&command.reference, "ref")?;
                let order_id = self.order_id(reference)?;
                self.platform.settlement().reconcile_payment(&order_id).await?;
            }
        }
        Ok(())
    }

    /// One row per loan, in the order the script created them.
    pub async fn report(&self) -> Result<Vec<LoanReportRow>> {
        let mut rows = Vec::with_capacity(self.loans.len());
        for (reference, id) in &self.loans {
            let loan = self.platform.loans().get_loan(*id).await?;
            let schedule = self.platform.scheduler().get_schedule(*id).await?;
            rows.push(LoanReportRow {
                loan: reference.clone(),
                borrower: loan.borrower_id,
                status: loan.status,
                amount: loan.amount.value().normalize(),
                installments: schedule.len(),
                paid: schedule
                    .iter()
                    .filter(|i| i.status == InstallmentStatus::Paid)
                    .count(),
                installment_amount: schedule.first().map(|i| i.amount.value()),
            });
        }
        Ok(rows)
    }

    fn loan_id(&self, command: &ScriptCommand) -> Result<LoanId> {
        let reference = ScriptCommand::require(&command.loan, "loan")?;
        self.loans
            .iter()
            .find(|(r, _)| r == reference)
            .map(|(_, id)| *id)
            .ok_or_else(|| LendingError::not_found("Loan", reference))
    }

    fn order_id(&self, reference: &str) -> Result<String> {
        self.payments
            .get(reference)
            .cloned()
            .ok_or_else(|| LendingError::not_found("Payment", reference))
    }
}

fn missing(column: &str) -> LendingError {
    LendingError::ValidationError(format!("missing '{column}' column"))
}
