use crate::config::StoreConfig;
use crate::domain::account::{Account, AccountId, NewAccount, Page};
use crate::domain::currency::Currency;
use crate::domain::ledger::{Entry, EntryId, NewEntry, NewTransfer, Transfer, TransferId};
use crate::domain::ports::{
    AccountRepository, AtomicScope, LedgerRepository, LedgerStore, ScopeBox,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Transaction,
    TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

/// Column Family for account rows, keyed by account id.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for ledger entries, keyed by entry id.
pub const CF_ENTRIES: &str = "entries";
/// Column Family for transfer records, keyed by transfer id.
pub const CF_TRANSFERS: &str = "transfers";
/// Index of `(account_id, entry_id)` pairs.
pub const CF_ENTRIES_BY_ACCOUNT: &str = "entries_by_account";
/// Index of `(account_id, transfer_id)` pairs, one per side of each transfer.
pub const CF_TRANSFERS_BY_ACCOUNT: &str = "transfers_by_account";
/// Unique `(currency, owner)` index over accounts.
pub const CF_OWNERS: &str = "owners";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_ACCOUNTS,
    CF_ENTRIES,
    CF_TRANSFERS,
    CF_ENTRIES_BY_ACCOUNT,
    CF_TRANSFERS_BY_ACCOUNT,
    CF_OWNERS,
];

// Ids are positive, so big-endian keys iterate in numeric order.
fn id_key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}

fn index_key(account_id: AccountId, id: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&account_id.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn owner_key(owner: &str, currency: Currency) -> Vec<u8> {
    format!("{}\0{}", currency.code(), owner).into_bytes()
}

fn decode_id(bytes: &[u8]) -> Result<i64> {
    <[u8; 8]>::try_from(bytes)
        .map(i64::from_be_bytes)
        .map_err(|_| LedgerError::internal("malformed id key"))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Next-id counters, seeded from the highest key on disk when the store opens.
struct Sequences {
    account: AtomicI64,
    entry: AtomicI64,
    transfer: AtomicI64,
}

fn next(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

/// A persistent ledger store on top of a RocksDB `TransactionDB`.
///
/// Each entity lives in its own Column Family. Atomic scopes are pessimistic
/// RocksDB transactions: `get_for_update_cf` takes the exclusive row lock and
/// all writes become visible together on commit.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<TransactionDB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<TransactionDB>,
    sequences: Arc<Sequences>,
    config: StoreConfig,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens the store, creating missing Column Families and applying the
    /// configured lock timeout to every transaction.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(lock_timeout_millis(&config));

        let cfs = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db: TransactionDB = TransactionDB::open_cf_descriptors(&opts, &txn_db_opts, path, cfs)?;

        let sequences = Sequences {
            account: AtomicI64::new(last_id(&db, CF_ACCOUNTS)?),
            entry: AtomicI64::new(last_id(&db, CF_ENTRIES)?),
            transfer: AtomicI64::new(last_id(&db, CF_TRANSFERS)?),
        };
        info!(
            last_account = sequences.account.load(Ordering::SeqCst),
            last_transfer = sequences.transfer.load(Ordering::SeqCst),
            "opened RocksDB ledger store"
        );

        Ok(Self {
            db: Arc::new(db),
            sequences: Arc::new(sequences),
            config,
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        column_family(&self.db, name)
    }

    fn transaction(&self) -> Transaction<'_, TransactionDB> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_deadlock_detect(true);
        txn_opts.set_lock_timeout(lock_timeout_millis(&self.config));
        self.db.transaction_opt(&WriteOptions::default(), &txn_opts)
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, id: i64) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ids stored under `account_id` in one of the per-account indexes.
    fn indexed_ids(&self, cf_name: &str, account_id: AccountId) -> Result<Vec<i64>> {
        let cf = self.cf(cf_name)?;
        let prefix = id_key(account_id);
        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(decode_id(&key[8..])?);
        }
        Ok(ids)
    }
}

/// RocksDB lock timeout in milliseconds; negative waits forever.
fn lock_timeout_millis(config: &StoreConfig) -> i64 {
    match config.lock_timeout {
        Some(limit) => i64::try_from(limit.as_millis()).unwrap_or(i64::MAX),
        None => -1,
    }
}

fn column_family<'a>(db: &'a TransactionDB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| LedgerError::internal(format!("{} column family not found", name)))
}

fn last_id(db: &TransactionDB, cf_name: &str) -> Result<i64> {
    let cf = column_family(db, cf_name)?;
    match db.iterator_cf(cf, IteratorMode::End).next() {
        Some(item) => {
            let (key, _) = item?;
            decode_id(&key)
        }
        None => Ok(0),
    }
}

#[async_trait]
impl AccountRepository for RocksDBStore {
    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, id)?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let accounts = self.cf(CF_ACCOUNTS)?;
        let owners = self.cf(CF_OWNERS)?;

        let txn = self.transaction();
        let owner = owner_key(&account.owner, account.currency);
        if txn.get_for_update_cf(owners, &owner, true)?.is_some() {
            return Err(LedgerError::DuplicateAccount {
                owner: account.owner,
                currency: account.currency,
            });
        }

        let account = account.into_account(next(&self.sequences.account));
        txn.put_cf(accounts, id_key(account.id), encode(&account)?)?;
        txn.put_cf(owners, &owner, id_key(account.id))?;
        txn.commit()?;
        Ok(account)
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .skip(page.offset)
            .take(page.limit)
            .map(|item| {
                let (_key, value) = item?;
                decode::<Account>(&value)
            })
            .collect()
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let accounts = self.cf(CF_ACCOUNTS)?;
        let owners = self.cf(CF_OWNERS)?;

        let txn = self.transaction();
        let account: Account = match txn.get_for_update_cf(accounts, id_key(id), true)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(LedgerError::AccountNotFound(id)),
        };

        if !self.indexed_ids(CF_ENTRIES_BY_ACCOUNT, id)?.is_empty()
            || !self.indexed_ids(CF_TRANSFERS_BY_ACCOUNT, id)?.is_empty()
        {
            return Err(LedgerError::AccountInUse(id));
        }

        txn.delete_cf(accounts, id_key(id))?;
        txn.delete_cf(owners, owner_key(&account.owner, account.currency))?;
        txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for RocksDBStore {
    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.get_row(CF_ENTRIES, id)?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        page.slice(self.indexed_ids(CF_ENTRIES_BY_ACCOUNT, account_id)?)
            .into_iter()
            .map(|id| {
                self.get_row::<Entry>(CF_ENTRIES, id)?
                    .ok_or(LedgerError::EntryNotFound(id))
            })
            .collect()
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.get_row(CF_TRANSFERS, id)?
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>> {
        page.slice(self.indexed_ids(CF_TRANSFERS_BY_ACCOUNT, account_id)?)
            .into_iter()
            .map(|id| {
                self.get_row::<Transfer>(CF_TRANSFERS, id)?
                    .ok_or(LedgerError::TransferNotFound(id))
            })
            .collect()
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn begin<'a>(&'a self) -> Result<ScopeBox<'a>> {
        Ok(Box::new(RocksDBScope {
            store: self,
            txn: self.transaction(),
        }))
    }
}

/// Atomic scope backed by one pessimistic RocksDB transaction.
///
/// Dropping the scope without committing discards the transaction and releases
/// its key locks.
pub struct RocksDBScope<'a> {
    store: &'a RocksDBStore,
    txn: Transaction<'a, TransactionDB>,
}

impl RocksDBScope<'_> {
    fn read_account(&self, id: AccountId, for_update: bool) -> Result<Account> {
        let cf = self.store.cf(CF_ACCOUNTS)?;
        let bytes = if for_update {
            self.txn.get_for_update_cf(cf, id_key(id), true)?
        } else {
            self.txn.get_cf(cf, id_key(id))?
        };
        match bytes {
            Some(bytes) => decode(&bytes),
            None => Err(LedgerError::AccountNotFound(id)),
        }
    }
}

#[async_trait]
impl AtomicScope for RocksDBScope<'_> {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.read_account(id, true)
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let mut account = self.read_account(id, true)?;
        let balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::InvalidTransfer(format!("balance overflow on account {}", id))
        })?;
        if balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                account_id: id,
                balance: account.balance,
                requested: -delta,
            });
        }

        account.balance = balance;
        let cf = self.store.cf(CF_ACCOUNTS)?;
        self.txn.put_cf(cf, id_key(id), encode(&account)?)?;
        Ok(account)
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.read_account(transfer.from_account_id, false)?;
        self.read_account(transfer.to_account_id, false)?;

        let transfer = transfer.into_transfer(next(&self.store.sequences.transfer));
        let transfers = self.store.cf(CF_TRANSFERS)?;
        let index = self.store.cf(CF_TRANSFERS_BY_ACCOUNT)?;
        self.txn
            .put_cf(transfers, id_key(transfer.id), encode(&transfer)?)?;
        for account_id in [transfer.from_account_id, transfer.to_account_id] {
            self.txn
                .put_cf(index, index_key(account_id, transfer.id), b"")?;
        }
        Ok(transfer)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.read_account(entry.account_id, false)?;

        let entry = entry.into_entry(next(&self.store.sequences.entry));
        let entries = self.store.cf(CF_ENTRIES)?;
        let index = self.store.cf(CF_ENTRIES_BY_ACCOUNT)?;
        self.txn.put_cf(entries, id_key(entry.id), encode(&entry)?)?;
        self.txn
            .put_cf(index, index_key(entry.account_id, entry.id), b"")?;
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_account_store() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let account = store
            .create_account(NewAccount::new("alice", 100, Currency::Usd))
            .await
            .unwrap();
        assert_eq!(account.id, 1);
        assert_eq!(store.get_account(1).await.unwrap(), account);

        let duplicate = store
            .create_account(NewAccount::new("alice", 5, Currency::Usd))
            .await;
        assert!(matches!(duplicate, Err(LedgerError::DuplicateAccount { .. })));

        let all = store.list_accounts(Page::default()).await.unwrap();
        assert_eq!(all, vec![account]);
        assert!(matches!(
            store.get_account(2).await,
            Err(LedgerError::AccountNotFound(2))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_scope_commit_and_rollback() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store
            .create_account(NewAccount::new("alice", 100, Currency::Usd))
            .await
            .unwrap();
        store
            .create_account(NewAccount::new("bob", 0, Currency::Usd))
            .await
            .unwrap();

        let mut scope = store.begin().await.unwrap();
        scope.add_account_balance(1, -10).await.unwrap();
        scope
            .create_transfer(NewTransfer {
                from_account_id: 1,
                to_account_id: 2,
                amount: Amount::new(10).unwrap(),
            })
            .await
            .unwrap();
        scope.rollback().await.unwrap();

        assert_eq!(store.get_account(1).await.unwrap().balance, 100);
        assert!(store.list_transfers(1, Page::default()).await.unwrap().is_empty());

        let mut scope = store.begin().await.unwrap();
        scope.add_account_balance(1, -10).await.unwrap();
        let entry = scope
            .create_entry(NewEntry { account_id: 1, amount: -10 })
            .await
            .unwrap();
        scope.commit().await.unwrap();

        assert_eq!(store.get_account(1).await.unwrap().balance, 90);
        assert_eq!(store.list_entries(1, Page::default()).await.unwrap(), vec![entry]);
        assert!(matches!(
            store.delete_account(1).await,
            Err(LedgerError::AccountInUse(1))
        ));
        store.delete_account(2).await.unwrap();
    }

    #[tokio::test]
    async fn test_rocksdb_lock_wait_is_transient() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().with_lock_timeout(Some(Duration::from_millis(50)));
        let store = RocksDBStore::open_with_config(dir.path(), config).unwrap();
        store
            .create_account(NewAccount::new("alice", 100, Currency::Usd))
            .await
            .unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(1).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rocksdb_lock_wait_without_timeout() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::default().with_lock_timeout(None);
        let store = RocksDBStore::open_with_config(dir.path(), config).unwrap();
        store
            .create_account(NewAccount::new("alice", 100, Currency::Usd))
            .await
            .unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.add_account_balance(1, -40).await.unwrap();

        // get_for_update_cf blocks its worker thread until the holder commits.
        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut scope = waiter_store.begin().await?;
            let account = scope.get_account_for_update(1).await?;
            scope.rollback().await?;
            Ok::<_, LedgerError>(account)
        });

        // Longer than RocksDB's built-in 1 s transaction lock timeout.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        holder.commit().await.unwrap();

        let account = waiter.await.unwrap().unwrap();
        assert_eq!(account.balance, 60);
    }

    #[test]
    fn test_lock_timeout_millis() {
        assert_eq!(lock_timeout_millis(&StoreConfig::default()), 5000);
        assert_eq!(
            lock_timeout_millis(&StoreConfig::default().with_lock_timeout(None)),
            -1
        );
        assert_eq!(
            lock_timeout_millis(
                &StoreConfig::default().with_lock_timeout(Some(Duration::MAX))
            ),
            i64::MAX
        );
    }

    #[tokio::test]
    async fn test_rocksdb_sequences_resume_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store
                .create_account(NewAccount::new("alice", 100, Currency::Usd))
                .await
                .unwrap();
            store
                .create_account(NewAccount::new("bob", 100, Currency::Usd))
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let carol = store
            .create_account(NewAccount::new("carol", 0, Currency::Eur))
            .await
            .unwrap();
        assert_eq!(carol.id, 3);
        assert_eq!(store.get_account(1).await.unwrap().owner, "alice");
    }
}
