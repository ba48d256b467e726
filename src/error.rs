use crate::domain::account::AccountId;
use crate::domain::currency::Currency;
use crate::domain::ledger::{EntryId, TransferId};
use thiserror::Error;

/// Errors produced by the ledger, its stores and the surrounding I/O.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("transfer {0} not found")]
    TransferNotFound(TransferId),
    #[error(
        "insufficient funds in account {account_id}: balance {balance}, requested {requested}"
    )]
    InsufficientFunds {
        account_id: AccountId,
        balance: i64,
        requested: i64,
    },
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },
    #[error("account for owner {owner} in {currency} already exists")]
    DuplicateAccount { owner: String, currency: Currency },
    #[error("account {0} is referenced by ledger records")]
    AccountInUse(AccountId),
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("atomic scope timed out and was rolled back")]
    Timeout,
    #[error("internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Driver-independent classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InsufficientFunds,
    InvalidArgument,
    Conflict,
    /// The operation was rolled back and may succeed if the caller retries it.
    Transient,
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) | Self::EntryNotFound(_) | Self::TransferNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidTransfer(_) | Self::ValidationError(_) | Self::CurrencyMismatch { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::DuplicateAccount { .. } | Self::AccountInUse(_) => ErrorKind::Conflict,
            Self::Transient(_) | Self::Timeout => ErrorKind::Transient,
            Self::InternalError(_) | Self::CsvError(_) | Self::IoError(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind as RocksKind;
        match err.kind() {
            // Lock wait timeouts and detected deadlocks surface as Busy/TimedOut.
            RocksKind::Busy | RocksKind::TimedOut | RocksKind::TryAgain => {
                Self::Transient(err.into_string())
            }
            _ => Self::InternalError(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
