use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payorder::config::EngineConfig;
use payorder::domain::ports::PaymentRepositoryRef;
use payorder::infrastructure::in_memory::InMemoryPaymentRepository;
use payorder::infrastructure::notifier::QueueNotifier;
#[cfg(feature = "storage-rocksdb")]
use payorder::infrastructure::rocksdb::RocksDbPaymentRepository;
use payorder::interfaces::csv::command_reader::CommandReader;
use payorder::interfaces::csv::payment_writer::PaymentWriter;
use payorder::interfaces::script::ScriptRunner;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command script CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Currency of payments created without one
    #[arg(long, env = "PAYORDER_CURRENCY", default_value = "CNY")]
    currency: String,

    /// Minutes a payment attempt may stay processing before the sweep checks it
    #[arg(long, env = "PAYORDER_PAYMENT_EXPIRY_MINUTES", default_value_t = 30)]
    payment_expiry_minutes: i64,

    /// Minutes a refund may stay processing before the sweep checks it
    #[arg(long, env = "PAYORDER_RECONCILIATION_GRACE_MINUTES", default_value_t = 5)]
    reconciliation_grace_minutes: i64,

    /// Secret the simulated channels sign callbacks with
    #[arg(long, env = "PAYORDER_CHANNEL_SECRET", default_value = "payorder-sim")]
    channel_secret: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("PAYORDER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn open_repository(db_path: Option<PathBuf>) -> Result<PaymentRepositoryRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Arc::new(RocksDbPaymentRepository::open(path).into_diagnostic()?)),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryPaymentRepository::new()))
        }
        None => Ok(Arc::new(InMemoryPaymentRepository::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let repository = open_repository(cli.db_path)?;
    let config = EngineConfig {
        default_currency: cli.currency,
        ..EngineConfig::default()
    }
    .with_payment_expiry_minutes(cli.payment_expiry_minutes)
    .with_reconciliation_grace_minutes(cli.reconciliation_grace_minutes);

    let (notifier, mut events) = QueueNotifier::new();
    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                event = %event.kind,
                payment = %event.payment_code,
                status = %event.status,
                "payment event"
            );
        }
    });

    let runner = ScriptRunner::with_simulated_channels(
        repository,
        Arc::new(notifier),
        config,
        &cli.channel_secret,
    );

    // Process commands; a bad line is reported and skipped
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for (index, command) in reader.commands().enumerate() {
        let line = index + 2;
        match command {
            Ok(command) => {
                if let Err(e) = runner.run(command).await {
                    eprintln!("Error processing line {}: {}", line, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading line {}: {}", line, e);
            }
        }
    }

    let payments = runner.payments().await.into_diagnostic()?;

    // Dropping the runner closes the event queue so the consumer can finish
    drop(runner);
    consumer.await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments).into_diagnostic()?;

    Ok(())
}
