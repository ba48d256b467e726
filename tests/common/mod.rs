#![allow(dead_code)]

use async_trait::async_trait;
use bankcore::application::engine::TransferEngine;
use bankcore::domain::account::{Account, AccountId, NewAccount, Page};
use bankcore::domain::currency::Currency;
use bankcore::domain::ledger::{Entry, EntryId, NewEntry, NewTransfer, Transfer, TransferId};
use bankcore::domain::ports::{
    AccountRepository, AtomicScope, LedgerRepository, LedgerStore, ScopeBox,
};
use bankcore::error::{LedgerError, Result};
use bankcore::infrastructure::in_memory::InMemoryLedgerStore;
use std::io::Write;
use tempfile::NamedTempFile;

/// Opens one USD account per balance; ids are assigned 1, 2, ...
pub async fn seed_accounts(store: &dyn LedgerStore, balances: &[i64]) {
    for (i, balance) in balances.iter().enumerate() {
        store
            .create_account(NewAccount::new(
                format!("owner-{}", i + 1),
                *balance,
                Currency::Usd,
            ))
            .await
            .unwrap();
    }
}

pub async fn engine_with(balances: &[i64]) -> TransferEngine {
    let store = InMemoryLedgerStore::new();
    seed_accounts(&store, balances).await;
    TransferEngine::new(Box::new(store))
}

pub async fn balances(store: &dyn LedgerStore) -> Vec<i64> {
    store
        .list_accounts(Page::new(0, Page::MAX_LIMIT).unwrap())
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.balance)
        .collect()
}

pub async fn transfer_count(store: &dyn LedgerStore, account_id: AccountId) -> usize {
    store
        .list_transfers(account_id, Page::new(0, Page::MAX_LIMIT).unwrap())
        .await
        .unwrap()
        .len()
}

pub async fn entry_count(store: &dyn LedgerStore, account_id: AccountId) -> usize {
    store
        .list_entries(account_id, Page::new(0, Page::MAX_LIMIT).unwrap())
        .await
        .unwrap()
        .len()
}

pub fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Wraps a store and fails the n-th balance update of every scope.
pub struct FaultyStore<S> {
    inner: S,
    fail_on_update: usize,
}

impl<S: LedgerStore> FaultyStore<S> {
    pub fn new(inner: S, fail_on_update: usize) -> Self {
        Self {
            inner,
            fail_on_update,
        }
    }
}

#[async_trait]
impl<S: LedgerStore> AccountRepository for FaultyStore<S> {
    async fn get_account(&self, id: AccountId) -> Result<Account> {
        self.inner.get_account(id).await
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        self.inner.create_account(account).await
    }

    async fn list_accounts(&self, page: Page) -> Result<Vec<Account>> {
        self.inner.list_accounts(page).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.inner.delete_account(id).await
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerRepository for FaultyStore<S> {
    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.inner.get_entry(id).await
    }

    async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.inner.list_entries(account_id, page).await
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.inner.get_transfer(id).await
    }

    async fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>> {
        self.inner.list_transfers(account_id, page).await
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for FaultyStore<S> {
    async fn begin<'a>(&'a self) -> Result<ScopeBox<'a>> {
        Ok(Box::new(FaultyScope {
            inner: self.inner.begin().await?,
            updates: 0,
            fail_on_update: self.fail_on_update,
        }))
    }
}

struct FaultyScope<'a> {
    inner: ScopeBox<'a>,
    updates: usize,
    fail_on_update: usize,
}

#[async_trait]
impl AtomicScope for FaultyScope<'_> {
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.inner.get_account_for_update(id).await
    }

    async fn add_account_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        self.updates += 1;
        if self.updates == self.fail_on_update {
            return Err(LedgerError::Transient(format!(
                "injected failure updating account {}",
                id
            )));
        }
        self.inner.add_account_balance(id, delta).await
    }

    async fn create_transfer(&mut self, transfer: NewTransfer) -> Result<Transfer> {
        self.inner.create_transfer(transfer).await
    }

    async fn create_entry(&mut self, entry: NewEntry) -> Result<Entry> {
        self.inner.create_entry(entry).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}
