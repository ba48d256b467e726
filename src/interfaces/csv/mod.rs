pub mod account_writer;
pub mod reader;
pub mod records;
