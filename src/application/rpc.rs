//! Synchronous call surface between services.
//!
//! [`LoanRpc`] is the administrative entry point into the loan lifecycle.
//! Remote collaborators are reached through the `Resilient*` decorators,
//! which bound every attempt with a timeout and retry transient failures
//! with capped exponential backoff before giving up with
//! [`LendingError::UpstreamUnavailable`].

use crate::application::loans::LoanService;
use crate::config::PlatformConfig;
use crate::domain::loan::{LoanId, LoanStatus};
use crate::domain::ports::{
    GatewayStatus, IdentityDirectory, IdentityDirectoryRef, PaymentGateway, PaymentGatewayRef,
    PaymentHandle, PaymentInit, UserProfile, Verification,
};
use crate::error::{LendingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            timeout: config.rpc_timeout(),
            max_retries: config.rpc_max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        }
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PlatformConfig::default())
    }
}

/// Runs `call` under `policy`. Permanent errors are returned as-is on the
/// first occurrence.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(LendingError::UpstreamUnavailable(format!(
                "{operation} timed out after {}ms",
                policy.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                return Err(LendingError::UpstreamUnavailable(format!(
                    "{operation} failed after {} attempts: {e}",
                    attempt + 1
                )));
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanDecisionRequest {
    pub loan_id: String,
    #[serde(default)]
    pub admin_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetLoanRequest {
    pub loan_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRpcResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LoanStatus>,
}

impl LoanRpcResponse {
    fn ok(message: &str, status: LoanStatus) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            status: Some(status),
        }
    }

    fn failed(error: &LendingError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            status: None,
        }
    }
}

/// Administrative operations on loans.
///
/// Business failures come back as `success: false`; `Err` is reserved for
/// the transport.
#[async_trait]
pub trait LoanRpc: Send + Sync {
    async fn approve_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse>;
    async fn reject_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse>;
    async fn get_loan(&self, request: GetLoanRequest) -> Result<LoanRpcResponse>;
}

pub type LoanRpcRef = Arc<dyn LoanRpc>;

fn parse_loan_id(raw: &str) -> Result<LoanId> {
    raw.trim()
        .parse()
        .map_err(|_| LendingError::ValidationError(format!("Invalid loan id '{raw}'")))
}

/// Serves [`LoanRpc`] from the local loan service.
pub struct LoanRpcServer {
    loans: Arc<LoanService>,
}

impl LoanRpcServer {
    pub fn new(loans: Arc<LoanService>) -> Self {
        Self { loans }
    }
}

#[async_trait]
impl LoanRpc for LoanRpcServer {
    async fn approve_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse> {
        info!(loan_id = %request.loan_id, admin_id = %request.admin_id, "ApproveLoan called");
        let result = match parse_loan_id(&request.loan_id) {
            Ok(id) => self.loans.approve_loan(id).await,
            Err(e) => Err(e),
        };
        Ok(match result {
            Ok(loan) => LoanRpcResponse::ok("Loan approved successfully", loan.status),
            Err(e) => {
                warn!(loan_id = %request.loan_id, error = %e, "ApproveLoan failed");
                LoanRpcResponse::failed(&e)
            }
        })
    }

    async fn reject_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse> {
        info!(loan_id = %request.loan_id, admin_id = %request.admin_id, "RejectLoan called");
        let result = match parse_loan_id(&request.loan_id) {
            Ok(id) => self.loans.reject_loan(id, &request.reason).await,
            Err(e) => Err(e),
        };
        Ok(match result {
            Ok(loan) => LoanRpcResponse::ok("Loan rejected successfully", loan.status),
            Err(e) => {
                warn!(loan_id = %request.loan_id, error = %e, "RejectLoan failed");
                LoanRpcResponse::failed(&e)
            }
        })
    }

    async fn get_loan(&self, request: GetLoanRequest) -> Result<LoanRpcResponse> {
        let result = match parse_loan_id(&request.loan_id) {
            Ok(id) => self.loans.get_loan(id).await,
            Err(e) => Err(e),
        };
        Ok(match result {
            Ok(loan) => LoanRpcResponse::ok("Loan retrieved", loan.status),
            Err(e) => LoanRpcResponse::failed(&e),
        })
    }
}

pub struct ResilientLoanRpc {
    inner: LoanRpcRef,
    policy: RetryPolicy,
}

impl ResilientLoanRpc {
    pub fn new(inner: LoanRpcRef, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Each attempt runs on its own task. A timeout abandons the caller's
    /// wait but the server still finishes the transition and its publish.
    async fn detached<F, Fut>(&self, operation: &str, call: F) -> Result<LoanRpcResponse>
    where
        F: Fn(LoanRpcRef) -> Fut + Send + Sync,
        Fut: Future<Output = Result<LoanRpcResponse>> + Send + 'static,
    {
        with_retry(&self.policy, operation, || {
            let attempt = tokio::spawn(call(self.inner.clone()));
            async move {
                attempt
                    .await
                    .map_err(|e| LendingError::InternalError(Box::new(e)))?
            }
        })
        .await
    }
}

#[async_trait]
impl LoanRpc for ResilientLoanRpc {
    async fn approve_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse> {
        self.detached("ApproveLoan", move |rpc| {
            let request = request.clone();
            async move { rpc.approve_loan(request).await }
        })
        .await
    }

    async fn reject_loan(&self, request: LoanDecisionRequest) -> Result<LoanRpcResponse> {
        self.detached("RejectLoan", move |rpc| {
            let request = request.clone();
            async move { rpc.reject_loan(request).await }
        })
        .await
    }

    async fn get_loan(&self, request: GetLoanRequest) -> Result<LoanRpcResponse> {
        self.detached("GetLoan", move |rpc| {
            let request = request.clone();
            async move { rpc.get_loan(request).await }
        })
        .await
    }
}

pub struct ResilientIdentityDirectory {
    inner: IdentityDirectoryRef,
    policy: RetryPolicy,
}

impl ResilientIdentityDirectory {
    pub fn new(inner: IdentityDirectoryRef, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl IdentityDirectory for ResilientIdentityDirectory {
    async fn verify_user(&self, user_id: &str) -> Result<Verification> {
        with_retry(&self.policy, "VerifyUser", move || {
            self.inner.verify_user(user_id)
        })
        .await
    }

    async fn get_user(&self, user_id: &str) -> Result<UserProfile> {
        with_retry(&self.policy, "GetUser", move || self.inner.get_user(user_id)).await
    }
}

pub struct ResilientPaymentGateway {
    inner: PaymentGatewayRef,
    policy: RetryPolicy,
}

impl ResilientPaymentGateway {
    pub fn new(inner: PaymentGatewayRef, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl PaymentGateway for ResilientPaymentGateway {
    async fn initialize_payment(&self, request: &PaymentInit) -> Result<PaymentHandle> {
        with_retry(&self.policy, "InitializePayment", move || {
            self.inner.initialize_payment(request)
        })
        .await
    }

    async fn payment_status(&self, order_id: &str) -> Result<GatewayStatus> {
        with_retry(&self.policy, "GetPaymentStatus", move || {
            self.inner.payment_status(order_id)
        })
        .await
    }
}
