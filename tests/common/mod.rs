#![allow(dead_code)]

use lendsaga::application::platform::{Collaborators, LendingPlatform};
use lendsaga::config::PlatformConfig;
use lendsaga::domain::loan::Loan;
use lendsaga::infrastructure::mock_vendor::{
    MockPaymentGateway, RecordingMessenger, StaticIdentityDirectory,
};
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

/// A running platform plus handles on its vendor stand-ins.
pub struct Harness {
    pub platform: LendingPlatform,
    pub identity: StaticIdentityDirectory,
    pub gateway: MockPaymentGateway,
    pub messenger: RecordingMessenger,
}

/// Remote-call settings tight enough that retry paths finish quickly.
pub fn fast_config() -> PlatformConfig {
    PlatformConfig {
        rpc_timeout_ms: 200,
        rpc_max_retries: 2,
        rpc_backoff_base_ms: 5,
        rpc_backoff_max_ms: 20,
        max_deliveries: 3,
        ..PlatformConfig::default()
    }
}

pub async fn start() -> Harness {
    start_with(fast_config()).await
}

pub async fn start_with(config: PlatformConfig) -> Harness {
    let identity = StaticIdentityDirectory::auto_enroll();
    let gateway = MockPaymentGateway::default();
    let messenger = RecordingMessenger::new();
    let platform = LendingPlatform::start_in_memory(
        &config,
        Collaborators {
            identity: Arc::new(identity.clone()),
            gateway: Arc::new(gateway.clone()),
            messenger: Arc::new(messenger.clone()),
        },
    )
    .await
    .unwrap();
    Harness {
        platform,
        identity,
        gateway,
        messenger,
    }
}

/// Applies for and approves the reference loan (U1, 50000 over 6 months
/// at 12%), waiting for the schedule to be generated.
pub async fn approved_loan(harness: &Harness) -> Loan {
    let loans = harness.platform.loans();
    let loan = loans.apply_loan("U1", dec!(50000), 6, dec!(12)).await.unwrap();
    let loan = loans.approve_loan(loan.id).await.unwrap();
    harness.platform.wait_idle().await;
    loan
}

/// Writes a script that applies for, approves and fully repays `loans`
/// loans of 12000 over 3 months.
pub fn generate_script(path: &Path, loans: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);

    wtr.write_record([
        "command", "ref", "loan", "borrower", "amount", "tenure", "rate", "detail",
    ])?;

    for i in 1..=loans {
        let loan = format!("L{i}");
        let borrower = format!("U{i}");
        wtr.write_record([
            "apply",
            loan.as_str(),
            "",
            borrower.as_str(),
            "12000",
            "3",
            "12",
            "",
        ])?;
        wtr.write_record(["approve", "", loan.as_str()])?;
        for n in 1..=3 {
            let payment = format!("P{i}_{n}");
            wtr.write_record(["pay", payment.as_str(), loan.as_str()])?;
            wtr.write_record(["settle", payment.as_str()])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
