use clap::Args;
use rust_decimal::Decimal;
use std::time::Duration;

/// Runtime settings shared by every service of the platform.
///
/// Flattened into the CLI; each flag can also be set from a `LENDSAGA_*`
/// environment variable.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    /// Per-attempt timeout for remote calls, in milliseconds.
    #[arg(long, env = "LENDSAGA_RPC_TIMEOUT_MS", default_value_t = 3000)]
    pub rpc_timeout_ms: u64,

    /// Retries after the first failed remote call.
    #[arg(long, env = "LENDSAGA_RPC_MAX_RETRIES", default_value_t = 3)]
    pub rpc_max_retries: u32,

    #[arg(long, env = "LENDSAGA_RPC_BACKOFF_BASE_MS", default_value_t = 200)]
    pub rpc_backoff_base_ms: u64,

    #[arg(long, env = "LENDSAGA_RPC_BACKOFF_MAX_MS", default_value_t = 2000)]
    pub rpc_backoff_max_ms: u64,

    /// Deliveries attempted before a message is dead-lettered.
    #[arg(long, env = "LENDSAGA_MAX_DELIVERIES", default_value_t = 5)]
    pub max_deliveries: u32,

    #[arg(long, env = "LENDSAGA_CURRENCY", default_value = "INR")]
    pub currency: String,

    #[arg(long, env = "LENDSAGA_PAYMENT_PROVIDER", default_value = "CASHFREE")]
    pub payment_provider: String,

    /// SMS destination used when the borrower has no phone on file.
    #[arg(long, env = "LENDSAGA_DEFAULT_PHONE", default_value = "+919999999999")]
    pub default_phone: String,

    /// Annual rate (percent) assumed when an approval omits it.
    #[arg(long, env = "LENDSAGA_DEFAULT_INTEREST_RATE", default_value_t = Decimal::TEN)]
    pub default_interest_rate: Decimal,
}

impl PlatformConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.rpc_backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.rpc_backoff_max_ms)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: 3000,
            rpc_max_retries: 3,
            rpc_backoff_base_ms: 200,
            rpc_backoff_max_ms: 2000,
            max_deliveries: 5,
            currency: "INR".to_string(),
            payment_provider: "CASHFREE".to_string(),
            default_phone: "+919999999999".to_string(),
            default_interest_rate: Decimal::TEN,
        }
    }
}
