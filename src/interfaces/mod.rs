//! Outer adapters feeding the engine and reporting its results.

pub mod csv;
