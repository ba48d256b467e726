use crate::domain::account::{AccountId, Amount};
use crate::domain::currency::Currency;
use crate::domain::ports::AccountRepository;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// A transfer as requested by a client, in major currency units.
///
/// The engine trusts its caller to have resolved both accounts and matched
/// their currencies; [`TransferRequest::validate`] is that caller-side check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "from")]
    pub from_account_id: AccountId,
    #[serde(rename = "to")]
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
}

/// A validated request, ready for [`TransferEngine::transfer`](super::engine::TransferEngine::transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOrder {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

impl TransferRequest {
    pub async fn validate<A>(&self, accounts: &A) -> Result<TransferOrder>
    where
        A: AccountRepository + ?Sized,
    {
        if self.from_account_id < 1 || self.to_account_id < 1 {
            return Err(LedgerError::ValidationError(
                "account ids must be at least 1".to_string(),
            ));
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::ValidationError(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }

        for id in [self.from_account_id, self.to_account_id] {
            let account = accounts.get_account(id).await?;
            if account.currency != self.currency {
                return Err(LedgerError::CurrencyMismatch {
                    account_id: id,
                    expected: self.currency,
                    actual: account.currency,
                });
            }
        }

        let amount = Amount::new(self.currency.to_minor(self.amount)?)?;
        Ok(TransferOrder {
            from: self.from_account_id,
            to: self.to_account_id,
            amount,
        })
    }
}
