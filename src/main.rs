use bankcore::application::engine::TransferEngine;
use bankcore::application::request::TransferRequest;
use bankcore::config::{EngineConfig, StoreConfig};
use bankcore::domain::account::{Account, Page};
use bankcore::domain::ports::{AccountRepository, LedgerStoreBox};
use bankcore::infrastructure::in_memory::InMemoryLedgerStore;
use bankcore::interfaces::csv::account_writer::AccountWriter;
use bankcore::interfaces::csv::reader::RecordReader;
use bankcore::interfaces::csv::records::AccountRecord;
use bankcore::logging::{LogFormat, init_logging};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input transfers CSV file (from,to,amount,currency)
    input: PathBuf,

    /// Accounts to open before processing transfers (owner,currency,balance)
    #[arg(long)]
    accounts: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Number of transfers processed concurrently
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    /// Roll back any transfer whose atomic scope runs longer than this
    #[arg(long)]
    scope_timeout_ms: Option<u64>,

    /// How long a transfer waits for an account lock (0 waits forever)
    #[arg(long, default_value_t = 5000)]
    lock_timeout_ms: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            scope_timeout: self.scope_timeout_ms.map(Duration::from_millis),
        }
    }

    fn store_config(&self) -> StoreConfig {
        let lock_timeout =
            (self.lock_timeout_ms > 0).then(|| Duration::from_millis(self.lock_timeout_ms));
        StoreConfig::default().with_lock_timeout(lock_timeout)
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>, config: StoreConfig) -> Result<LedgerStoreBox> {
    use bankcore::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Box::new(
            RocksDBStore::open_with_config(path, config).into_diagnostic()?,
        )),
        None => Ok(Box::new(InMemoryLedgerStore::with_config(config))),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>, config: StoreConfig) -> Result<LedgerStoreBox> {
    if db_path.is_some() {
        warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(InMemoryLedgerStore::with_config(config)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("info", cli.log_format);

    let store = open_store(cli.db_path.clone(), cli.store_config())?;
    let engine = Arc::new(TransferEngine::with_config(store, cli.engine_config()));

    if let Some(path) = &cli.accounts {
        open_accounts(&engine, File::open(path).into_diagnostic()?).await;
    }

    let file = File::open(&cli.input).into_diagnostic()?;
    run_transfers(&engine, file, cli.concurrency as usize).await;

    let accounts = all_accounts(&engine).await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(&accounts).into_diagnostic()?;

    Ok(())
}

async fn open_accounts(engine: &TransferEngine, source: File) {
    for (line, record) in RecordReader::new(source).records::<AccountRecord>().enumerate() {
        let created = match record.and_then(AccountRecord::into_new_account) {
            Ok(account) => engine.store().create_account(account).await,
            Err(e) => Err(e),
        };
        match created {
            Ok(account) => info!(account_id = account.id, owner = %account.owner, "account opened"),
            Err(e) => warn!(line = line + 1, error = %e, "Error opening account"),
        }
    }
}

async fn run_transfers(engine: &Arc<TransferEngine>, source: File, concurrency: usize) {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for (line, record) in RecordReader::new(source).records::<TransferRequest>().enumerate() {
        let line = line + 1;
        let request = match record {
            Ok(request) => request,
            Err(e) => {
                warn!(line, error = %e, "Error reading transfer");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let engine = Arc::clone(engine);
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = match request.validate(engine.store()).await {
                Ok(order) => {
                    engine
                        .transfer(order.from, order.to, order.amount.value())
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => info!(
                    line,
                    transfer_id = result.transfer.id,
                    from = result.transfer.from_account_id,
                    to = result.transfer.to_account_id,
                    amount = result.transfer.amount,
                    "transfer committed"
                ),
                Err(e) => warn!(line, kind = ?e.kind(), error = %e, "Error processing transfer"),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "transfer task failed");
        }
    }
}

async fn all_accounts(engine: &TransferEngine) -> bankcore::error::Result<Vec<Account>> {
    let mut accounts = Vec::new();
    let mut page = Page::new(0, Page::MAX_LIMIT)?;
    loop {
        let batch = engine.store().list_accounts(page).await?;
        let done = batch.len() < page.limit;
        accounts.extend(batch);
        if done {
            return Ok(accounts);
        }
        page.offset += page.limit;
    }
}
