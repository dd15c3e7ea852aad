// token-sale/src/policy.rs

use crate::{config::SaleConfig, lifecycle::Totals, CapKind, SaleError, SaleResult};
use sale_core::{Amount, BlockNumber, ExchangeRate};
use serde::{Deserialize, Serialize};

/// Pricing phase derived from block height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatePhase {
    /// Before `exchange_rate_changes_block`
    First,
    /// From `exchange_rate_changes_block` on
    Second,
}

/// Tokens owed for a contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub phase: RatePhase,
    pub rate: ExchangeRate,
    pub tokens: Amount,
}

/// Rate and cap rules. Holds no state of its own, so every method can be
/// called freely for validation.
#[derive(Debug, Clone, Copy)]
pub struct SalePolicy<'a> {
    config: &'a SaleConfig,
}

impl<'a> SalePolicy<'a> {
    pub fn new(config: &'a SaleConfig) -> Self {
        Self { config }
    }

    /// Rate in effect at `block`
    pub fn rate_at(&self, block: BlockNumber) -> (RatePhase, ExchangeRate) {
        if block < self.config.exchange_rate_changes_block {
            (RatePhase::First, self.config.rate_first)
        } else {
            (RatePhase::Second, self.config.rate_second)
        }
    }

    /// tokens = amount × rate, exact
    pub fn compute_issuance(&self, amount: &Amount, block: BlockNumber) -> Issuance {
        let (phase, rate) = self.rate_at(block);
        Issuance {
            phase,
            rate,
            tokens: amount.scaled(rate),
        }
    }

    /// Reject a contribution that would push either total past its ceiling.
    /// A contribution is never partially filled.
    pub fn check_caps(&self, totals: &Totals, amount: &Amount, tokens: &Amount) -> SaleResult<()> {
        let tokens_after = totals.tokens_issued.clone() + tokens.clone();
        if tokens_after > self.config.token_creation_cap {
            return Err(SaleError::CapExceeded {
                kind: CapKind::TokenCreationCap,
            });
        }

        let wei_after = totals.wei_received.clone() + amount.clone();
        if wei_after > self.config.eth_received_cap {
            return Err(SaleError::CapExceeded {
                kind: CapKind::EthReceivedCap,
            });
        }

        Ok(())
    }

    /// Issuance for `amount` at `block`, if the caps allow it
    pub fn quote(&self, totals: &Totals, amount: &Amount, block: BlockNumber) -> SaleResult<Issuance> {
        let issuance = self.compute_issuance(amount, block);
        self.check_caps(totals, amount, &issuance.tokens)?;
        Ok(issuance)
    }

    pub fn cap_reached(&self, totals: &Totals) -> bool {
        totals.tokens_issued >= self.config.token_creation_cap
    }

    pub fn minimum_reached(&self, totals: &Totals) -> bool {
        totals.wei_received >= self.config.eth_received_min
    }

    pub fn remaining_token_headroom(&self, totals: &Totals) -> Amount {
        self.config
            .token_creation_cap
            .checked_sub(&totals.tokens_issued)
            .unwrap_or_else(Amount::zero)
    }

    pub fn remaining_wei_headroom(&self, totals: &Totals) -> Amount {
        self.config
            .eth_received_cap
            .checked_sub(&totals.wei_received)
            .unwrap_or_else(Amount::zero)
    }

    /// Largest contribution accepted at `block` given current totals
    pub fn max_contribution(&self, totals: &Totals, block: BlockNumber) -> Amount {
        let (_, rate) = self.rate_at(block);
        let by_tokens = self
            .remaining_token_headroom(totals)
            .checked_div(&Amount::from_u64(rate))
            .unwrap_or_else(Amount::zero);
        let by_wei = self.remaining_wei_headroom(totals);
        by_tokens.min(by_wei)
    }
}
