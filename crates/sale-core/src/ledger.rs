// sale-core/src/ledger.rs

use crate::{Address, Amount, LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token balances keyed by holder
///
/// `total_supply` always equals the sum of all balances; every mutating
/// method either updates both or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Non-zero balances only
    balances: BTreeMap<Address, Amount>,
    /// Sum of all balances
    total_supply: Amount,
}

impl Ledger {
    /// Create new empty ledger
    pub fn new() -> Self {
        Self {
            balances: BTreeMap::new(),
            total_supply: Amount::zero(),
        }
    }

    /// Get holder balance
    pub fn balance_of(&self, holder: &Address) -> Amount {
        self.balances
            .get(holder)
            .cloned()
            .unwrap_or_else(Amount::zero)
    }

    pub fn total_supply(&self) -> &Amount {
        &self.total_supply
    }

    /// Mint `amount` to `to`
    pub fn issue(&mut self, to: &Address, amount: &Amount) {
        if amount.is_zero() {
            return;
        }
        let balance = self.balance_of(to) + amount.clone();
        self.balances.insert(*to, balance);
        self.total_supply = self.total_supply.clone() + amount.clone();

        tracing::trace!(holder = %to, %amount, "issued tokens");
    }

    /// Move tokens between holders
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: &Amount) -> LedgerResult<()> {
        let from_balance = self.balance_of(from);

        let remaining = from_balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::InsufficientBalance {
                required: amount.clone(),
                available: from_balance.clone(),
            }
        })?;

        if from == to || amount.is_zero() {
            return Ok(());
        }

        let to_balance = self.balance_of(to) + amount.clone();
        self.set_balance(*from, remaining);
        self.set_balance(*to, to_balance);

        Ok(())
    }

    /// Zero the holder's balance and remove it from supply. Returns the burned amount.
    /// Fails without effect if the supply cannot cover the balance.
    pub fn burn_all(&mut self, holder: &Address) -> LedgerResult<Amount> {
        let burned = self.balance_of(holder);
        let supply = self.total_supply.checked_sub(&burned).ok_or_else(|| {
            LedgerError::SupplyUnderflow {
                burned: burned.clone(),
                supply: self.total_supply.clone(),
            }
        })?;

        self.balances.remove(holder);
        self.total_supply = supply;

        tracing::trace!(%holder, amount = %burned, "burned tokens");
        Ok(burned)
    }

    /// Holders with a non-zero balance, in address order
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    pub fn holder_count(&self) -> usize {
        self.balances.len()
    }

    /// Recomputed sum of every balance
    pub fn sum_of_balances(&self) -> Amount {
        self.balances.values().sum()
    }

    /// Check that the cached supply matches the balances
    pub fn is_consistent(&self) -> bool {
        self.sum_of_balances() == self.total_supply
            && self.balances.values().all(|b| !b.is_zero())
    }

    fn set_balance(&mut self, holder: Address, balance: Amount) {
        if balance.is_zero() {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, balance);
        }
    }
}
