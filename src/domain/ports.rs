use super::account::{Account, AccountId, NewAccount, Page};
use super::ledger::{Entry, EntryId, NewEntry, NewTransfer, Transfer, TransferId};
use crate::error::Result;
use async_trait::async_trait;

/// Committed-state account operations that need no atomic scope.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Account>;
    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    /// Accounts in ascending id order.
    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>>;
    /// Fails with `AccountInUse` while entries or transfers reference the account.
    async fn delete_account(&self, id: AccountId) -> Result<()>;
}

/// Lookup side of the append-only entry and transfer tables.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_entry(&self, id: EntryId) -> Result<Entry>;
    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;
    async fn get_transfer(&self, id: TransferId) -> Result<Transfer>;
    /// Transfers where the account is either source or destination.
    async fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>>;
}

/// A storage backend able to open atomic scopes.
#[async_trait]
pub trait LedgerStore: AccountRepository + LedgerRepository {
    async fn begin<'a>(&'a self) -> Result<ScopeBox<'a>>;
}

/// One all-or-nothing unit of work against a [`LedgerStore`].
///
/// Writes become visible to other readers only on [`commit`](Self::commit).
/// Dropping a scope without committing discards every write and releases its
/// row locks.
#[async_trait]
pub trait AtomicScope: Send {
    /// Reads an account and holds its exclusive row lock until the scope ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;
    /// Applies `balance = balance + delta` to the locked row and returns it.
    ///
    /// Rejects a negative result with `InsufficientFunds`.
    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;
    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer>;
    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

pub type ScopeBox<'a> = Box<dyn AtomicScope + 'a>;
pub type LedgerStoreBox = Box<dyn LedgerStore>;
