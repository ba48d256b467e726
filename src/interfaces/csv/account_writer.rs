use crate::domain::account::Account;
use crate::error::Result;
use crate::interfaces::csv::records::AccountBalanceRecord;
use std::io::Write;

/// Writes account balances as CSV (`id,owner,currency,balance`).
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes every account in the given order, then flushes the sink.
    pub fn write_accounts<'a, I>(&mut self, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Account>,
    {
        for account in accounts {
            self.writer.serialize(AccountBalanceRecord::from(account))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
