use crate::application::consumer::EventHandler;
use crate::domain::events::{DomainEvent, EventEnvelope};
use crate::domain::notification::{Channel, Notification};
use crate::domain::ports::{IdentityDirectoryRef, MessengerRef, NotificationStoreBox};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent(Notification),
    /// Delivery was attempted and failed; the failure is on record.
    Failed(Notification),
    /// This envelope was already handled.
    Duplicate,
    /// The event kind does not notify the borrower.
    Skipped,
}

/// Turns lifecycle and settlement events into borrower messages.
///
/// Delivery problems never fail the handler: they end up in the audit record
/// and the event is acknowledged.
pub struct NotificationDispatcher {
    store: NotificationStoreBox,
    messenger: MessengerRef,
    identity: IdentityDirectoryRef,
    default_phone: String,
}

impl NotificationDispatcher {
    pub fn new(
        store: NotificationStoreBox,
        messenger: MessengerRef,
        identity: IdentityDirectoryRef,
        default_phone: impl Into<String>,
    ) -> Self {
        Self {
            store,
            messenger,
            identity,
            default_phone: default_phone.into(),
        }
    }

    pub async fn dispatch(&self, envelope: &EventEnvelope) -> Result<DispatchOutcome> {
        let Some(message) = render(&envelope.event) else {
            return Ok(DispatchOutcome::Skipped);
        };
        if self.store.exists_for_event(envelope.id).await? {
            debug!(event_id = %envelope.id, "Notification already sent for event");
            return Ok(DispatchOutcome::Duplicate);
        }

        let borrower_id = envelope.event.borrower_id();
        let route = self.route_for(borrower_id).await;

        let (channel, content, sent) = match &route {
            Route::Sms(phone) => (
                Channel::Sms,
                json!({ "message": message, "phoneNumber": phone }),
                self.messenger.send_sms(phone, &message).await,
            ),
            Route::Email(email) => {
                let subject = subject(&envelope.event);
                (
                    Channel::Email,
                    json!({ "subject": subject, "message": message, "email": email }),
                    self.messenger.send_email(email, subject, &message).await,
                )
            }
        };
        let outcome = match sent {
            Ok(receipt) if receipt.success => Ok(()),
            Ok(receipt) => Err(receipt.message),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &outcome {
            warn!(
                event = envelope.routing_key(),
                borrower_id,
                %reason,
                "Notification delivery failed"
            );
        }

        let notification = Notification::record(
            borrower_id,
            envelope.id,
            channel,
            content,
            outcome,
        );
        self.store.append(notification.clone()).await?;

        if notification.error_message.is_some() {
            Ok(DispatchOutcome::Failed(notification))
        } else {
            info!(event = envelope.routing_key(), borrower_id, "Notification sent");
            Ok(DispatchOutcome::Sent(notification))
        }
    }

    pub async fn notifications_by_borrower(&self, borrower_id: &str) -> Result<Vec<Notification>> {
        self.store.by_borrower(borrower_id).await
    }

    /// Phone on file first, then email, then the configured default phone.
    async fn route_for(&self, borrower_id: &str) -> Route {
        let profile = match self.identity.get_user(borrower_id).await {
            Ok(profile) => profile,
            Err(e) => {
                debug!(borrower_id, error = %e, "No contact on file, using default phone");
                return Route::Sms(self.default_phone.clone());
            }
        };
        let present = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
        if let Some(phone) = present(profile.phone) {
            Route::Sms(phone)
        } else if let Some(email) = present(profile.email) {
            Route::Email(email)
        } else {
            Route::Sms(self.default_phone.clone())
        }
    }
}

enum Route {
    Sms(String),
    Email(String),
}

fn subject(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::LoanApplied(_) => "Loan application received",
        DomainEvent::LoanApproved(_) => "Loan approved",
        DomainEvent::LoanRejected(_) => "Loan application update",
        DomainEvent::LoanDisbursed(_) => "Loan disbursed",
        DomainEvent::PaymentCompleted(_) => "Payment successful",
        DomainEvent::PaymentFailed(_) => "Payment failed",
        DomainEvent::PaymentCreated(_) => "Payment created",
    }
}

fn render(event: &DomainEvent) -> Option<String> {
    let text = match event {
        DomainEvent::LoanApplied(e) => format!(
            "Your loan application for ₹{} has been received. Loan ID: {}",
            e.amount, e.loan_id
        ),
        DomainEvent::LoanApproved(e) => format!(
            "Congratulations! Your loan of ₹{} has been approved. Loan ID: {}",
            e.amount, e.loan_id
        ),
        DomainEvent::LoanRejected(e) => format!(
            "Your loan application {} was not approved. Reason: {}",
            e.loan_id, e.reason
        ),
        DomainEvent::LoanDisbursed(e) => format!(
            "Your loan of ₹{} has been disbursed. Loan ID: {}",
            e.amount, e.loan_id
        ),
        DomainEvent::PaymentCompleted(e) => format!(
            "Payment of ₹{} successful. Transaction ID: {}",
            e.amount, e.payment_id
        ),
        DomainEvent::PaymentFailed(e) => format!(
            "Your payment for order {} failed: {}",
            e.order_id, e.reason
        ),
        DomainEvent::PaymentCreated(_) => return None,
    };
    Some(text)
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    fn name(&self) -> &'static str {
        "notification-dispatcher"
    }

    async fn handle(&self, envelope: EventEnvelope) -> Result<()> {
        self.dispatch(&envelope).await.map(|_| ())
    }
}
