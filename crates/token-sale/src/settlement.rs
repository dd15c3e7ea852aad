// token-sale/src/settlement.rs

//! Value movement seam between the sale and the host ledger.
//!
//! The sale never touches native balances itself. It asks a [`Settlement`]
//! to pull contributed value into escrow and to push escrowed value out to
//! the fund deposit or to refunded contributors.

use sale_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result type for settlement operations
pub type SettlementResult<T> = Result<T, SettlementError>;

/// Errors reported by a settlement backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Escrow shortfall: required {required}, available {available}")]
    EscrowShortfall { required: Amount, available: Amount },

    #[error("Transfer refused: {0}")]
    Refused(String),
}

/// Atomic value movements the sale depends on. Each call either moves the
/// full amount or fails without effect.
pub trait Settlement {
    /// Debit `from` and credit the sale escrow
    fn pull(&mut self, from: &Address, amount: &Amount) -> SettlementResult<()>;

    /// Debit the sale escrow and credit `to`
    fn push(&mut self, to: &Address, amount: &Amount) -> SettlementResult<()>;
}

/// Balance-map settlement backed by memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemorySettlement {
    accounts: BTreeMap<Address, Amount>,
    escrow: Amount,
}

impl InMemorySettlement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an external account out of thin air (genesis allocation)
    pub fn fund(&mut self, account: Address, amount: Amount) {
        let balance = self.balance_of(&account) + amount;
        self.accounts.insert(account, balance);
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts
            .get(account)
            .cloned()
            .unwrap_or_else(Amount::zero)
    }

    pub fn escrow_balance(&self) -> &Amount {
        &self.escrow
    }

    /// Escrow plus every external balance
    pub fn total_value(&self) -> Amount {
        self.accounts.values().sum::<Amount>() + self.escrow.clone()
    }
}

impl Settlement for InMemorySettlement {
    fn pull(&mut self, from: &Address, amount: &Amount) -> SettlementResult<()> {
        let available = self.balance_of(from);
        let remaining =
            available
                .checked_sub(amount)
                .ok_or_else(|| SettlementError::InsufficientFunds {
                    account: *from,
                    required: amount.clone(),
                    available: available.clone(),
                })?;

        self.accounts.insert(*from, remaining);
        self.escrow = self.escrow.clone() + amount.clone();
        Ok(())
    }

    fn push(&mut self, to: &Address, amount: &Amount) -> SettlementResult<()> {
        let remaining =
            self.escrow
                .checked_sub(amount)
                .ok_or_else(|| SettlementError::EscrowShortfall {
                    required: amount.clone(),
                    available: self.escrow.clone(),
                })?;

        self.escrow = remaining;
        self.fund(*to, amount.clone());
        Ok(())
    }
}
