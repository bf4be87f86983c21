//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod result;
mod transfer;

pub use account::{Account, SeedAccount};
pub use result::{Error, Result, TransferError};
pub use transfer::{
    parse_amount, NewTransfer, PartySnapshot, Transfer, TransferChannel, TransferReceipt,
};
