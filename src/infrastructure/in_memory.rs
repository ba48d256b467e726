use crate::config::StoreConfig;
use crate::domain::account::{Account, AccountId, NewAccount, Page};
use crate::domain::currency::Currency;
use crate::domain::ledger::{Entry, EntryId, NewEntry, NewTransfer, Transfer, TransferId};
use crate::domain::ports::{
    AccountRepository, AtomicScope, LedgerRepository, LedgerStore, ScopeBox,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

type RowLock = Arc<Mutex<()>>;

struct AccountRow {
    account: Account,
    lock: RowLock,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, AccountRow>,
    owners: HashMap<(String, Currency), AccountId>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

/// Id generator with database-sequence semantics: values handed to a scope
/// that later rolls back are never reused.
#[derive(Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct Shared {
    tables: RwLock<Tables>,
    account_seq: Sequence,
    entry_seq: Sequence,
    transfer_seq: Sequence,
    config: StoreConfig,
}

impl Shared {
    /// Waits for the exclusive lock on an account row.
    async fn acquire_row(&self, id: AccountId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let tables = self.tables.read().await;
            tables
                .accounts
                .get(&id)
                .map(|row| Arc::clone(&row.lock))
                .ok_or(LedgerError::AccountNotFound(id))?
        };

        let guard = match self.config.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| {
                    LedgerError::Transient(format!("lock wait timeout on account {}", id))
                })?,
            None => lock.lock_owned().await,
        };

        // The previous holder may have deleted the row.
        if !self.tables.read().await.accounts.contains_key(&id) {
            return Err(LedgerError::AccountNotFound(id));
        }
        Ok(guard)
    }
}

/// A thread-safe, in-process ledger store with row-level locking.
///
/// Committed rows live behind a `tokio::sync::RwLock`; every account row owns a
/// `tokio::sync::Mutex` that plays the role of an exclusive row lock. Scopes
/// stage their writes and publish them under the table write lock on commit, so
/// readers only ever observe committed state.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty store with the default lock timeout.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                account_seq: Sequence::default(),
                entry_seq: Sequence::default(),
                transfer_seq: Sequence::default(),
                config,
            }),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryLedgerStore {
    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let tables = self.shared.tables.read().await;
        tables
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        account.validate()?;
        let mut tables = self.shared.tables.write().await;

        let owner_key = (account.owner.clone(), account.currency);
        if tables.owners.contains_key(&owner_key) {
            return Err(LedgerError::DuplicateAccount {
                owner: account.owner,
                currency: account.currency,
            });
        }

        let account = account.into_account(self.shared.account_seq.next());
        tables.owners.insert(owner_key, account.id);
        tables.accounts.insert(
            account.id,
            AccountRow {
                account: account.clone(),
                lock: RowLock::default(),
            },
        );
        Ok(account)
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        let tables = self.shared.tables.read().await;
        Ok(page
            .slice(tables.accounts.values())
            .into_iter()
            .map(|row| row.account.clone())
            .collect())
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        let _guard = self.shared.acquire_row(id).await?;
        let mut tables = self.shared.tables.write().await;

        let referenced = tables.entries.values().any(|e| e.account_id == id)
            || tables.transfers.values().any(|t| t.involves(id));
        if referenced {
            return Err(LedgerError::AccountInUse(id));
        }

        let row = tables
            .accounts
            .remove(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        tables
            .owners
            .remove(&(row.account.owner, row.account.currency));
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerStore {
    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        let tables = self.shared.tables.read().await;
        tables
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let tables = self.shared.tables.read().await;
        Ok(page
            .slice(tables.entries.values().filter(|e| e.account_id == account_id))
            .into_iter()
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        let tables = self.shared.tables.read().await;
        tables
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>> {
        let tables = self.shared.tables.read().await;
        Ok(page
            .slice(tables.transfers.values().filter(|t| t.involves(account_id)))
            .into_iter()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin<'a>(&'a self) -> Result<ScopeBox<'a>> {
        Ok(Box::new(InMemoryScope::new(Arc::clone(&self.shared))))
    }
}

/// Atomic scope over an [`InMemoryLedgerStore`].
///
/// Holds the row locks it acquired until it is committed, rolled back or dropped.
pub struct InMemoryScope {
    shared: Arc<Shared>,
    locks: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    balances: BTreeMap<AccountId, i64>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    finished: bool,
}

impl InMemoryScope {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            locks: BTreeMap::new(),
            balances: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            finished: false,
        }
    }

    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if !self.locks.contains_key(&id) {
            let guard = self.shared.acquire_row(id).await?;
            self.locks.insert(id, guard);
        }
        Ok(())
    }

    /// The account as this scope sees it: committed row plus staged balance.
    async fn current(&self, id: AccountId) -> Result<Account> {
        let tables = self.shared.tables.read().await;
        let mut account = tables
            .accounts
            .get(&id)
            .map(|row| row.account.clone())
            .ok_or(LedgerError::AccountNotFound(id))?;
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Ok(account)
    }

    async fn ensure_account(&self, id: AccountId) -> Result<()> {
        if self.shared.tables.read().await.accounts.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(id))
        }
    }

    fn has_writes(&self) -> bool {
        !(self.balances.is_empty() && self.transfers.is_empty() && self.entries.is_empty())
    }
}

#[async_trait]
impl AtomicScope for InMemoryScope {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.lock_row(id).await?;
        self.current(id).await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.lock_row(id).await?;
        let mut account = self.current(id).await?;

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

        self.balances.insert(id, balance);
        account.balance = balance;
        Ok(account)
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.ensure_account(transfer.from_account_id).await?;
        self.ensure_account(transfer.to_account_id).await?;
        let transfer = transfer.into_transfer(self.shared.transfer_seq.next());
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.ensure_account(entry.account_id).await?;
        let entry = entry.into_entry(self.shared.entry_seq.next());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let shared = Arc::clone(&this.shared);
        let mut tables = shared.tables.write().await;

        // Unlocked rows referenced by inserts may have been deleted meanwhile.
        let referenced = this
            .transfers
            .iter()
            .flat_map(|t| [t.from_account_id, t.to_account_id])
            .chain(this.entries.iter().map(|e| e.account_id))
            .chain(this.balances.keys().copied());
        for id in referenced {
            if !tables.accounts.contains_key(&id) {
                return Err(LedgerError::AccountNotFound(id));
            }
        }

        for (id, balance) in &this.balances {
            if let Some(row) = tables.accounts.get_mut(id) {
                row.account.balance = *balance;
            }
        }
        for transfer in this.transfers.drain(..) {
            tables.transfers.insert(transfer.id, transfer);
        }
        for entry in this.entries.drain(..) {
            tables.entries.insert(entry.id, entry);
        }
        drop(tables);

        this.balances.clear();
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        debug!(
            locked_rows = this.locks.len(),
            staged_transfers = this.transfers.len(),
            staged_entries = this.entries.len(),
            "rolling back atomic scope"
        );
        this.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryScope {
    fn drop(&mut self) {
        if !self.finished && self.has_writes() {
            debug!(
                staged_transfers = self.transfers.len(),
                staged_entries = self.entries.len(),
                "atomic scope dropped without commit, discarding writes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;
    use std::time::Duration;

    async fn seeded_store(config: StoreConfig) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::with_config(config);
        store
            .create_account(NewAccount::new("alice", 100, Currency::Usd))
            .await
            .unwrap();
        store
            .create_account(NewAccount::new("bob", 50, Currency::Usd))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_in_memory_account_store() {
        let store = seeded_store(StoreConfig::default()).await;

        let alice = store.get_account(1).await.unwrap();
        assert_eq!(alice.owner, "alice");
        assert_eq!(alice.balance, 100);

        let all = store.list_accounts(Page::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, 2);

        assert!(matches!(
            store.get_account(3).await,
            Err(LedgerError::AccountNotFound(3))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_owner_currency_rejected() {
        let store = seeded_store(StoreConfig::default()).await;
        let result = store
            .create_account(NewAccount::new("alice", 0, Currency::Usd))
            .await;
        assert!(matches!(result, Err(LedgerError::DuplicateAccount { .. })));

        // Same owner in another currency is a different account.
        let eur = store
            .create_account(NewAccount::new("alice", 0, Currency::Eur))
            .await
            .unwrap();
        assert_eq!(eur.id, 3);
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = seeded_store(StoreConfig::default()).await;
        let mut scope = store.begin().await.unwrap();

        let updated = scope.add_account_balance(1, -40).await.unwrap();
        assert_eq!(updated.balance, 60);
        let transfer = scope
            .create_transfer(NewTransfer {
                from_account_id: 1,
                to_account_id: 2,
                amount: Amount::new(40).unwrap(),
            })
            .await
            .unwrap();

        assert_eq!(store.get_account(1).await.unwrap().balance, 100);
        assert!(store.get_transfer(transfer.id).await.is_err());

        scope.commit().await.unwrap();
        assert_eq!(store.get_account(1).await.unwrap().balance, 60);
        assert_eq!(store.get_transfer(transfer.id).await.unwrap(), transfer);
    }

    #[tokio::test]
    async fn test_dropped_scope_discards_writes() {
        let store = seeded_store(StoreConfig::default()).await;
        {
            let mut scope = store.begin().await.unwrap();
            scope.add_account_balance(2, 25).await.unwrap();
            scope.create_entry(NewEntry { account_id: 2, amount: 25 }).await.unwrap();
        }
        assert_eq!(store.get_account(2).await.unwrap().balance, 50);
        assert!(store.list_entries(2, Page::default()).await.unwrap().is_empty());

        // The row lock was released by the drop.
        let mut scope = store.begin().await.unwrap();
        assert_eq!(scope.get_account_for_update(2).await.unwrap().balance, 50);
        scope.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_balance_rejected() {
        let store = seeded_store(StoreConfig::default()).await;
        let mut scope = store.begin().await.unwrap();
        let result = scope.add_account_balance(2, -51).await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds {
                account_id: 2,
                balance: 50,
                requested: 51
            })
        ));
    }

    #[tokio::test]
    async fn test_row_lock_wait_times_out() {
        let config = StoreConfig::default().with_lock_timeout(Some(Duration::from_millis(50)));
        let store = seeded_store(config).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(1).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(1).await.unwrap_err();
        assert!(err.is_transient());

        // Other rows stay available.
        assert_eq!(waiter.get_account_for_update(2).await.unwrap().id, 2);
        holder.rollback().await.unwrap();
        waiter.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequences_not_reused_after_rollback() {
        let store = seeded_store(StoreConfig::default()).await;
        let mut scope = store.begin().await.unwrap();
        let first = scope.create_entry(NewEntry { account_id: 1, amount: 1 }).await.unwrap();
        scope.rollback().await.unwrap();

        let mut scope = store.begin().await.unwrap();
        let second = scope.create_entry(NewEntry { account_id: 1, amount: 1 }).await.unwrap();
        scope.commit().await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_delete_account() {
        let store = seeded_store(StoreConfig::default()).await;
        let mut scope = store.begin().await.unwrap();
        scope.create_entry(NewEntry { account_id: 1, amount: 5 }).await.unwrap();
        scope.commit().await.unwrap();

        assert!(matches!(
            store.delete_account(1).await,
            Err(LedgerError::AccountInUse(1))
        ));
        store.delete_account(2).await.unwrap();
        assert!(matches!(
            store.get_account(2).await,
            Err(LedgerError::AccountNotFound(2))
        ));

        // The (owner, currency) slot is free again.
        let reopened = store
            .create_account(NewAccount::new("bob", 0, Currency::Usd))
            .await
            .unwrap();
        assert_eq!(reopened.id, 3);
    }

    #[tokio::test]
    async fn test_insert_requires_existing_accounts() {
        let store = seeded_store(StoreConfig::default()).await;
        let mut scope = store.begin().await.unwrap();
        let result = scope
            .create_transfer(NewTransfer {
                from_account_id: 1,
                to_account_id: 99,
                amount: Amount::new(1).unwrap(),
            })
            .await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(99))));
    }
}
