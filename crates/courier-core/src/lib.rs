//! # courier-core
//! Foundation types and collaborator traits for Courier escrow transfers.

pub mod constants;
pub mod error;
pub mod traits;
pub mod transfer;
pub mod types;
pub mod units;
