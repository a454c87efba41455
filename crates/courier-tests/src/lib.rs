//! End-to-end test suite for Courier escrow transfers.
//!
//! The wallet runs against an in-memory chain that decodes and applies
//! every signed transaction, and an in-memory ledger. Nothing here talks
//! to a network.

pub mod chain;
pub mod helpers;
pub mod ledger;
