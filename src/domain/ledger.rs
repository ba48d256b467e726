use crate::domain::account::{Account, AccountId, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EntryId = i64;
pub type TransferId = i64;

/// An immutable record of one account's balance delta.
///
/// Negative amounts are debits, positive amounts are credits.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub amount: i64,
}

impl NewEntry {
    pub fn debit(account_id: AccountId, amount: Amount) -> Self {
        Self {
            account_id,
            amount: amount.debit(),
        }
    }

    pub fn credit(account_id: AccountId, amount: Amount) -> Self {
        Self {
            account_id,
            amount: amount.credit(),
        }
    }

    pub fn into_entry(self, id: EntryId) -> Entry {
        Entry {
            id,
            account_id: self.account_id,
            amount: self.amount,
            created_at: Utc::now(),
        }
    }
}

/// An immutable record pairing a source account, destination account and amount.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

impl NewTransfer {
    pub fn into_transfer(self, id: TransferId) -> Transfer {
        Transfer {
            id,
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount.value(),
            created_at: Utc::now(),
        }
    }
}

/// Every row a successful transfer created or mutated, as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
