//! Domain model: accounts, ledger records and the ports stores implement.

pub mod account;
pub mod currency;
pub mod ledger;
pub mod lock_order;
pub mod ports;
