use clap::Parser;
use lendsaga::application::platform::{Collaborators, LendingPlatform, PlatformStores};
use lendsaga::config::PlatformConfig;
use lendsaga::infrastructure::mock_vendor::{
    MockPaymentGateway, RecordingMessenger, StaticIdentityDirectory,
};
use lendsaga::interfaces::csv::command_reader::CommandReader;
use lendsaga::interfaces::csv::report_writer::ReportWriter;
use lendsaga::interfaces::scenario::ScenarioRunner;
use lendsaga::telemetry::init_tracing;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario script (CSV)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Borrowers whose KYC check should fail
    #[arg(long, value_delimiter = ',')]
    unverified: Vec<String>,

    #[command(flatten)]
    config: PlatformConfig,
}

fn open_stores(db_path: Option<PathBuf>) -> Result<PlatformStores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = lendsaga::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
            Ok(PlatformStores::rocksdb(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => Err(miette::miette!(
            "--db-path requires a build with the storage-rocksdb feature"
        )),
        None => Ok(PlatformStores::in_memory()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let identity = StaticIdentityDirectory::auto_enroll();
    for borrower in &cli.unverified {
        identity.mark_unverified(borrower).await;
    }
    let collaborators = Collaborators {
        identity: Arc::new(identity),
        gateway: Arc::new(MockPaymentGateway::default()),
        messenger: Arc::new(RecordingMessenger::new()),
    };

    let stores = open_stores(cli.db_path)?;
    let platform = LendingPlatform::start(&cli.config, stores, collaborators)
        .await
        .into_diagnostic()?;

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut runner = ScenarioRunner::new(&platform, cli.config.default_interest_rate);
    for command_result in reader.commands() {
        match command_result {
            Ok(command) => {
                if let Err(e) = runner.execute(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let rows = runner.report().await.into_diagnostic()?;
    drop(runner);

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    platform.shutdown().await;
    Ok(())
}
