// sale-core/src/lib.rs

//! Core data structures for the token sale ledger
//!
//! This crate provides:
//! - Arbitrary precision token and wei amounts
//! - Participant addresses
//! - The token balance ledger

pub mod address;
pub mod ledger;
pub mod types;

pub use address::Address;
pub use ledger::Ledger;
pub use types::*;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur in ledger operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Supply underflow: burning {burned} from supply {supply}")]
    SupplyUnderflow { burned: Amount, supply: Amount },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}
