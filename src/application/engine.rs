use crate::config::EngineConfig;
use crate::domain::account::{AccountId, Amount};
use crate::domain::ledger::{NewEntry, NewTransfer, TransferResult};
use crate::domain::lock_order;
use crate::domain::ports::{AtomicScope, LedgerStore, LedgerStoreBox};
use crate::error::{LedgerError, Result};
use tracing::{debug, warn};

/// The main entry point for moving money between accounts.
///
/// `TransferEngine` owns the store handle and turns each transfer into one
/// atomic scope: a transfer record, a debit entry, a credit entry and two
/// balance updates that either all commit or all roll back. It holds no state
/// between calls, so one engine can serve any number of concurrent transfers.
pub struct TransferEngine {
    store: LedgerStoreBox,
    config: EngineConfig,
}

impl TransferEngine {
    /// Creates a new `TransferEngine` over the given store.
    pub fn new(store: LedgerStoreBox) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: LedgerStoreBox, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Read access to the underlying store for committed-state queries.
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// Moves `amount` minor units from `from` to `to`.
    ///
    /// Invalid arguments are rejected before the store is touched. Every other
    /// failure rolls the scope back, leaving no rows and no balance change.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<TransferResult> {
        let amount = Amount::new(amount)?;
        if from <= 0 || to <= 0 {
            return Err(LedgerError::InvalidTransfer(format!(
                "account ids must be positive, got {} and {}",
                from, to
            )));
        }
        if from == to {
            return Err(LedgerError::InvalidTransfer(format!(
                "cannot transfer from account {} to itself",
                from
            )));
        }

        let mut scope = self.store.begin().await?;
        let outcome = match self.config.scope_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, apply(scope.as_mut(), from, to, amount)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LedgerError::Timeout),
                }
            }
            None => apply(scope.as_mut(), from, to, amount).await,
        };

        match outcome {
            Ok(result) => {
                scope.commit().await?;
                debug!(
                    transfer_id = result.transfer.id,
                    from,
                    to,
                    amount = amount.value(),
                    "transfer committed"
                );
                Ok(result)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(from, to, error = %rollback_err, "rollback failed");
                }
                debug!(from, to, amount = amount.value(), error = %err, "transfer rolled back");
                Err(err)
            }
        }
    }
}

/// The writes of one transfer, inside an already open scope.
async fn apply<S: AtomicScope + ?Sized>(
    scope: &mut S,
    from: AccountId,
    to: AccountId,
    amount: Amount,
) -> Result<TransferResult> {
    let transfer = scope
        .create_transfer(NewTransfer {
            from_account_id: from,
            to_account_id: to,
            amount,
        })
        .await?;
    let from_entry = scope.create_entry(NewEntry::debit(from, amount)).await?;
    let to_entry = scope.create_entry(NewEntry::credit(to, amount)).await?;

    // Rows are always locked smaller id first, whichever side is the source.
    let (first, second) = lock_order::ordered(from, to);
    for id in [first, second] {
        let account = scope.get_account_for_update(id).await?;
        if id == from && account.balance < amount.value() {
            return Err(LedgerError::InsufficientFunds {
                account_id: from,
                balance: account.balance,
                requested: amount.value(),
            });
        }
    }

    let mut from_account = None;
    let mut to_account = None;
    for id in [first, second] {
        if id == from {
            from_account = Some(scope.add_account_balance(from, amount.debit()).await?);
        } else {
            to_account = Some(scope.add_account_balance(to, amount.credit()).await?);
        }
    }

    match (from_account, to_account) {
        (Some(from_account), Some(to_account)) => Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        }),
        _ => Err(LedgerError::internal("balance update skipped an account")),
    }
}
