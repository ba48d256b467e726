use crate::domain::account::{Account, AccountId, NewAccount};
use crate::domain::currency::Currency;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An account to open, with its balance in major units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountRecord {
    pub owner: String,
    pub currency: Currency,
    pub balance: Decimal,
}

impl AccountRecord {
    pub fn into_new_account(self) -> Result<NewAccount> {
        let balance = self.currency.to_minor(self.balance)?;
        Ok(NewAccount::new(self.owner, balance, self.currency))
    }
}

/// An account snapshot as written to the output CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBalanceRecord {
    pub id: AccountId,
    pub owner: String,
    pub currency: Currency,
    pub balance: Decimal,
}

impl From<&Account> for AccountBalanceRecord {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            owner: account.owner.clone(),
            currency: account.currency,
            balance: account.currency.to_major(account.balance),
        }
    }
}
