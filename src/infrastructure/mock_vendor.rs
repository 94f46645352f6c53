//! Self-contained stand-ins for the identity, payment and messaging vendors.
//!
//! They behave like the sandbox adapters used in development: deterministic
//! answers, `MOCK_*` references, and switches to simulate an unreachable
//! vendor or a rejected send.

use crate::domain::ports::{
    GatewayStatus, IdentityDirectory, Messenger, PaymentGateway, PaymentHandle, PaymentInit,
    SendReceipt, UserProfile, Verification,
};
use crate::error::{LendingError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

fn short_ref() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}

#[derive(Default)]
struct Directory {
    users: HashMap<String, UserProfile>,
    unverified: HashSet<String>,
}

/// Identity/KYC directory backed by a fixed set of profiles.
///
/// With `auto_enroll`, unknown users are treated as registered and KYC
/// verified unless explicitly marked unverified.
#[derive(Clone, Default)]
pub struct StaticIdentityDirectory {
    inner: Arc<RwLock<Directory>>,
    auto_enroll: bool,
    unreachable: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl StaticIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_enroll() -> Self {
        Self {
            auto_enroll: true,
            ..Self::default()
        }
    }

    pub async fn register(&self, profile: UserProfile) {
        let mut dir = self.inner.write().await;
        if !profile.kyc_verified {
            dir.unverified.insert(profile.user_id.clone());
        }
        dir.users.insert(profile.user_id.clone(), profile);
    }

    pub async fn mark_unverified(&self, user_id: &str) {
        self.inner.write().await.unverified.insert(user_id.to_string());
    }

    /// Makes every subsequent call fail with `UpstreamUnavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LendingError::UpstreamUnavailable(
                "identity directory unreachable".to_string(),
            ));
        }
        Ok(())
    }

    async fn lookup(&self, user_id: &str) -> Option<UserProfile> {
        let dir = self.inner.read().await;
        match dir.users.get(user_id) {
            Some(profile) => Some(profile.clone()),
            None if self.auto_enroll => Some(UserProfile {
                user_id: user_id.to_string(),
                name: None,
                phone: None,
                email: None,
                kyc_verified: !dir.unverified.contains(user_id),
            }),
            None => None,
        }
    }
}

#[async_trait]
impl IdentityDirectory for StaticIdentityDirectory {
    async fn verify_user(&self, user_id: &str) -> Result<Verification> {
        self.enter()?;
        let flagged = self.inner.read().await.unverified.contains(user_id);
        let verification = match self.lookup(user_id).await {
            None => Verification {
                success: false,
                message: "User not found".to_string(),
            },
            Some(profile) if flagged || !profile.kyc_verified => {
                Verification {
                    success: false,
                    message: "User KYC not verified".to_string(),
                }
            }
            Some(_) => Verification {
                success: true,
                message: "User verified".to_string(),
            },
        };
        Ok(verification)
    }

    async fn get_user(&self, user_id: &str) -> Result<UserProfile> {
        self.enter()?;
        self.lookup(user_id)
            .await
            .ok_or_else(|| LendingError::not_found("User", user_id))
    }
}

/// Sandbox payment gateway. Every order reports `default_status` when polled
/// unless overridden with [`MockPaymentGateway::set_status`].
#[derive(Clone)]
pub struct MockPaymentGateway {
    statuses: Arc<RwLock<HashMap<String, String>>>,
    default_status: String,
    unreachable: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    pub fn new(default_status: impl Into<String>) -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
            default_status: default_status.into(),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn set_status(&self, order_id: &str, status: impl Into<String>) {
        self.statuses
            .write()
            .await
            .insert(order_id.to_string(), status.into());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LendingError::UpstreamUnavailable(
                "payment gateway unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("SUCCESS")
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn initialize_payment(&self, request: &PaymentInit) -> Result<PaymentHandle> {
        self.check_reachable()?;
        debug!(
            order_id = %request.order_id,
            amount = %request.amount,
            "Initializing sandbox payment"
        );
        let session_id = format!("MOCK_SESS_{}", Uuid::new_v4());
        Ok(PaymentHandle {
            payment_url: Some(format!(
                "https://sandbox.payments.local/checkout?session_id={session_id}"
            )),
            session_id,
            provider_reference: Some(format!("MOCK_ORDER_{}", short_ref())),
        })
    }

    async fn payment_status(&self, order_id: &str) -> Result<GatewayStatus> {
        self.check_reachable()?;
        let status = self
            .statuses
            .read()
            .await
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| self.default_status.clone());
        Ok(GatewayStatus {
            status,
            transaction_id: Some(format!("MOCK_TX_{}", short_ref())),
            method: Some("UPI".to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub destination: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Messenger that records what it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<RwLock<Vec<SentMessage>>>,
    rejection: Arc<RwLock<Option<String>>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send report failure with `reason`.
    pub async fn reject_with(&self, reason: Option<String>) {
        *self.rejection.write().await = reason;
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }

    async fn deliver(&self, message: SentMessage) -> Result<SendReceipt> {
        if let Some(reason) = self.rejection.read().await.clone() {
            return Ok(SendReceipt {
                success: false,
                message: reason,
            });
        }
        debug!(destination = %message.destination, "Message sent");
        self.sent.write().await.push(message);
        Ok(SendReceipt {
            success: true,
            message: "Sent".to_string(),
        })
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_sms(&self, phone: &str, message: &str) -> Result<SendReceipt> {
        self.deliver(SentMessage {
            destination: phone.to_string(),
            subject: None,
            body: message.to_string(),
        })
        .await
    }

    async fn send_email(&self, email: &str, subject: &str, body: &str) -> Result<SendReceipt> {
        self.deliver(SentMessage {
            destination: email.to_string(),
            subject: Some(subject.to_string()),
            body: body.to_string(),
        })
        .await
    }
}
