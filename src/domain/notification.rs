use crate::domain::loan::BorrowerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Sms,
    Email,
    Push,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Pending,
}

/// Append-only audit record of one outbound communication attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub borrower_id: BorrowerId,
    /// Envelope id of the event that triggered this notification.
    pub source_event: Uuid,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub content: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn record(
        borrower_id: impl Into<BorrowerId>,
        source_event: Uuid,
        channel: Channel,
        content: serde_json::Value,
        outcome: Result<(), String>,
    ) -> Self {
        let (status, error_message) = match outcome {
            Ok(()) => (DeliveryStatus::Sent, None),
            Err(reason) => (DeliveryStatus::Failed, Some(reason)),
        };
        Self {
            id: Uuid::new_v4(),
            borrower_id: borrower_id.into(),
            source_event,
            channel,
            status,
            content,
            error_message,
            created_at: Utc::now(),
        }
    }
}
