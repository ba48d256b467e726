use crate::domain::currency::Currency;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;

/// A positive monetary amount in minor currency units.
///
/// Transfers only ever move an `Amount`; the sign of a balance change is
/// carried by the ledger entry, not by the amount itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LedgerError::InvalidTransfer(format!(
                "amount must be positive, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// The balance delta applied to the source account.
    pub fn debit(&self) -> i64 {
        -self.0
    }

    /// The balance delta applied to the destination account.
    pub fn credit(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// A monetary account as committed in the ledger store.
///
/// `balance` is held in minor units and is never negative in a committed state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, balance: i64, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "account owner must not be empty".to_string(),
            ));
        }
        if self.balance < 0 {
            return Err(LedgerError::ValidationError(format!(
                "opening balance must not be negative, got {}",
                self.balance
            )));
        }
        Ok(())
    }

    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            owner: self.owner,
            balance: self.balance,
            currency: self.currency,
            created_at: Utc::now(),
        }
    }
}

/// Offset/limit window for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const MAX_LIMIT: usize = 1000;

    pub fn new(offset: usize, limit: usize) -> Result<Self> {
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(LedgerError::ValidationError(format!(
                "page limit must be between 1 and {}, got {}",
                Self::MAX_LIMIT,
                limit
            )));
        }
        Ok(Self { offset, limit })
    }

    /// Applies the window to an already ordered sequence.
    pub fn slice<T, I: IntoIterator<Item = T>>(&self, items: I) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}
