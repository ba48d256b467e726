use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currencies an account may be denominated in.
///
/// Serialized as the upper-case ISO code; parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Currency {
    Usd,
    Eur,
    Uah,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Uah];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Uah => "UAH",
        }
    }

    /// Number of decimal places in one major unit.
    pub fn exponent(&self) -> u32 {
        2
    }

    /// Converts a major-unit amount (e.g. `30.25`) into minor units (`3025`).
    ///
    /// Amounts carrying more precision than the currency supports are rejected
    /// rather than rounded.
    pub fn to_minor(&self, amount: Decimal) -> Result<i64> {
        let scaled = amount
            .checked_mul(Decimal::from(10i64.pow(self.exponent())))
            .ok_or_else(|| {
                LedgerError::ValidationError(format!("amount {} is out of range", amount))
            })?;
        if scaled.fract() != Decimal::ZERO {
            return Err(LedgerError::ValidationError(format!(
                "amount {} has more than {} decimal places for {}",
                amount,
                self.exponent(),
                self
            )));
        }
        i64::try_from(scaled.trunc()).map_err(|_| {
            LedgerError::ValidationError(format!("amount {} is out of range", amount))
        })
    }

    /// Converts minor units back into a normalized major-unit decimal.
    pub fn to_major(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.exponent()).normalize()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LedgerError::ValidationError(format!("unsupported currency: {}", s)))
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(code: String) -> Result<Self> {
        code.parse()
    }
}
