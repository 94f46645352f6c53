use crate::application::outbox::EventPublisher;
use crate::domain::events::{DomainEvent, PaymentCompleted, PaymentCreated, PaymentFailed};
use crate::domain::installment::InstallmentId;
use crate::domain::loan::LoanId;
use crate::domain::money::Amount;
use crate::domain::payment::{Payment, PaymentId, PaymentStatus, ReportedStatus};
use crate::domain::ports::{
    MessageBusRef, PaymentGatewayRef, PaymentHandle, PaymentInit, PaymentStoreBox,
};
use crate::error::{LendingError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

/// A freshly issued payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    pub payment: Payment,
    pub handle: PaymentHandle,
}

impl PaymentIntent {
    pub fn order_id(&self) -> &str {
        &self.payment.order_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// The payment reached a terminal status and its event was published.
    Transitioned(Payment),
    /// The payment was already terminal; nothing changed.
    Duplicate(Payment),
    /// The reported status does not settle a payment.
    Ignored(Payment),
}

impl SettlementOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            SettlementOutcome::Transitioned(p)
            | SettlementOutcome::Duplicate(p)
            | SettlementOutcome::Ignored(p) => p,
        }
    }
}

/// Payment settlement tracker.
pub struct SettlementTracker {
    store: PaymentStoreBox,
    gateway: PaymentGatewayRef,
    events: EventPublisher,
    currency: String,
    provider: String,
}

impl SettlementTracker {
    pub fn new(
        store: PaymentStoreBox,
        gateway: PaymentGatewayRef,
        bus: MessageBusRef,
        currency: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            events: EventPublisher::new("payment-service", bus),
            currency: currency.into(),
            provider: provider.into(),
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Opens a payment with the gateway, records it as pending and announces
    /// it. Nothing is recorded if the gateway refuses.
    pub async fn initiate_payment(
        &self,
        borrower_id: &str,
        loan_id: LoanId,
        amount: Decimal,
        installment_id: Option<InstallmentId>,
    ) -> Result<PaymentIntent> {
        if borrower_id.trim().is_empty() {
            return Err(LendingError::ValidationError(
                "Borrower id must not be empty".to_string(),
            ));
        }
        let amount = Amount::new(amount)?;
        let order_id = Payment::new_order_id();

        let handle = self
            .gateway
            .initialize_payment(&PaymentInit {
                order_id: order_id.clone(),
                borrower_id: borrower_id.to_string(),
                amount,
                currency: self.currency.clone(),
            })
            .await?;

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            order_id,
            borrower_id: borrower_id.to_string(),
            loan_id,
            installment_id,
            amount,
            currency: self.currency.clone(),
            status: PaymentStatus::Pending,
            method: None,
            provider: self.provider.clone(),
            provider_reference: handle.provider_reference.clone(),
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(payment.clone()).await?;
        info!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            %loan_id,
            amount = %amount,
            "Payment initiated"
        );

        self.events
            .publish(DomainEvent::PaymentCreated(PaymentCreated {
                payment_id: payment.id,
                order_id: payment.order_id.clone(),
                user_id: payment.borrower_id.clone(),
                amount,
            }))
            .await?;
        Ok(PaymentIntent { payment, handle })
    }

    /// Applies a gateway settlement report. Safe to call any number of times
    /// for the same order: only the first terminal report changes anything.
    pub async fn handle_settlement_callback(
        &self,
        order_id: &str,
        reported_status: &str,
        transaction_id: Option<String>,
        method: Option<String>,
    ) -> Result<SettlementOutcome> {
        let mut payment = self.get_payment_by_order(order_id).await?;
        if payment.status.is_terminal() {
            info!(order_id, status = %payment.status, "Duplicate settlement ignored");
            return Ok(SettlementOutcome::Duplicate(payment));
        }

        let reported = ReportedStatus::parse(reported_status);
        let Some(target) = reported.target() else {
            info!(order_id, reported_status, "Non-terminal status reported");
            return Ok(SettlementOutcome::Ignored(payment));
        };

        payment.settle(target, transaction_id, method);
        if !self
            .store
            .update_if_status(payment.clone(), PaymentStatus::Pending)
            .await?
        {
            let current = self.get_payment_by_order(order_id).await?;
            info!(order_id, status = %current.status, "Concurrent settlement won the race");
            return Ok(SettlementOutcome::Duplicate(current));
        }

        let event = match target {
            PaymentStatus::Completed => {
                info!(order_id, payment_id = %payment.id, "Payment completed");
                DomainEvent::PaymentCompleted(PaymentCompleted {
                    payment_id: payment.id,
                    order_id: payment.order_id.clone(),
                    user_id: payment.borrower_id.clone(),
                    amount: payment.amount,
                    loan_id: payment.loan_id,
                    emi_id: payment.installment_id,
                })
            }
            _ => {
                warn!(order_id, payment_id = %payment.id, reported_status, "Payment failed");
                DomainEvent::PaymentFailed(PaymentFailed {
                    payment_id: payment.id,
                    order_id: payment.order_id.clone(),
                    user_id: payment.borrower_id.clone(),
                    reason: format!("Gateway reported {reported_status}"),
                })
            }
        };
        self.events.publish(event).await?;
        Ok(SettlementOutcome::Transitioned(payment))
    }

    /// Polls the gateway for the order's status and applies the answer as if
    /// it had arrived by callback.
    pub async fn reconcile_payment(&self, order_id: &str) -> Result<SettlementOutcome> {
        let payment = self.get_payment_by_order(order_id).await?;
        if payment.status.is_terminal() {
            return Ok(SettlementOutcome::Duplicate(payment));
        }
        let status = self.gateway.payment_status(order_id).await?;
        self.handle_settlement_callback(order_id, &status.status, status.transaction_id, status.method)
            .await
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LendingError::not_found("Payment", id))
    }

    pub async fn get_payment_by_order(&self, order_id: &str) -> Result<Payment> {
        self.store
            .by_order_id(order_id)
            .await?
            .ok_or_else(|| LendingError::not_found("Payment", order_id))
    }

    pub async fn payments_by_loan(&self, loan_id: LoanId) -> Result<Vec<Payment>> {
        self.store.by_loan(loan_id).await
    }
}
