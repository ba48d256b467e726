//! Application layer containing the transfer orchestration.
//!
//! [`engine::TransferEngine`] is the atomic funds-transfer core. Requests
//! arriving from outside are first checked by [`request::TransferRequest`],
//! which resolves both accounts and their currency before the engine runs.

pub mod engine;
pub mod request;
