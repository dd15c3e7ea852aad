// token-sale/src/lib.rs

//! Capped Two-Rate Token Sale
//!
//! This crate implements the sale state machine and accounting engine:
//! - Contributions during a block-bounded funding window
//! - Issuance at a first rate, then a second rate after the rate-change block
//! - Hard token cap, wei cap and wei minimum
//! - Lifecycle Fundraising -> Finalized -> Redeeming, with refunds when the
//!   minimum is missed
//!
//! Every action is all-or-nothing: guards run before any value moves or any
//! balance changes.

pub mod config;
pub mod events;
pub mod lifecycle;
pub mod policy;
pub mod sale;
pub mod settlement;

pub use config::SaleConfig;
pub use events::{EventLog, SaleEvent};
pub use lifecycle::{Lifecycle, SaleState, Totals};
pub use policy::{Issuance, RatePhase, SalePolicy};
pub use sale::{Action, CallContext, Contribution, Effect, SaleSnapshot, TokenSale};
pub use settlement::{InMemorySettlement, Settlement, SettlementError, SettlementResult};

use sale_core::{Amount, LedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for sale operations
pub type SaleResult<T> = Result<T, SaleError>;

/// Errors that can occur in sale operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleError {
    #[error("Action rejected: {guard}")]
    ActionRejected { guard: Guard },

    #[error("Cap exceeded: {kind}")]
    CapExceeded { kind: CapKind },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("Unauthorized caller")]
    Unauthorized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl SaleError {
    pub(crate) fn rejected(guard: Guard) -> Self {
        SaleError::ActionRejected { guard }
    }
}

/// Precondition that failed when an action was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Guard {
    NotFundraising,
    NotFinalized,
    Paused,
    AlreadyPaused,
    NotPaused,
    BeforeFundingStart,
    FundingEnded,
    FundingNotEnded,
    MinimumNotReached,
    MinimumReached,
    ZeroValue,
    UnexpectedValue,
    NoBalance,
    BlockInPast,
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Guard::NotFundraising => "sale is not fundraising",
            Guard::NotFinalized => "sale is not finalized",
            Guard::Paused => "sale is paused",
            Guard::AlreadyPaused => "sale is already paused",
            Guard::NotPaused => "sale is not paused",
            Guard::BeforeFundingStart => "funding has not started",
            Guard::FundingEnded => "funding has ended",
            Guard::FundingNotEnded => "funding has not ended and the cap is not reached",
            Guard::MinimumNotReached => "minimum raise not reached",
            Guard::MinimumReached => "minimum raise reached",
            Guard::ZeroValue => "no value attached",
            Guard::UnexpectedValue => "value attached to a non-payable action",
            Guard::NoBalance => "caller holds no tokens",
            Guard::BlockInPast => "block is before the last executed block",
        };
        f.write_str(text)
    }
}

/// Which ceiling a contribution would break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapKind {
    TokenCreationCap,
    EthReceivedCap,
}

impl fmt::Display for CapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapKind::TokenCreationCap => f.write_str("token creation cap"),
            CapKind::EthReceivedCap => f.write_str("eth received cap"),
        }
    }
}
