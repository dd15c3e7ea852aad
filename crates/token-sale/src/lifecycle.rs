// token-sale/src/lifecycle.rs

use crate::{SaleError, SaleResult};
use sale_core::{Amount, BlockNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sale lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Accepting contributions (or refunding, when the minimum was missed)
    Fundraising,
    /// Raise released to the fund deposit
    Finalized,
    /// Terminal phase
    Redeeming,
}

impl Lifecycle {
    /// Numeric state code: 0 fundraising, 1 finalized, 2 redeeming
    pub fn code(&self) -> u8 {
        match self {
            Lifecycle::Fundraising => 0,
            Lifecycle::Finalized => 1,
            Lifecycle::Redeeming => 2,
        }
    }

    /// Whether `next` is the single legal successor of `self`
    pub fn can_transition_to(&self, next: Lifecycle) -> bool {
        matches!(
            (self, next),
            (Lifecycle::Fundraising, Lifecycle::Finalized)
                | (Lifecycle::Finalized, Lifecycle::Redeeming)
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::Fundraising => f.write_str("fundraising"),
            Lifecycle::Finalized => f.write_str("finalized"),
            Lifecycle::Redeeming => f.write_str("redeeming"),
        }
    }
}

/// Running totals the cap checks read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub wei_received: Amount,
    pub tokens_issued: Amount,
}

impl Totals {
    /// Totals once `wei` is returned and `tokens` are burned
    pub fn after_refund(&self, wei: &Amount, tokens: &Amount) -> SaleResult<Totals> {
        let wei_received = self.wei_received.checked_sub(wei).ok_or_else(|| {
            SaleError::InconsistentState(format!(
                "refund of {} wei exceeds wei received {}",
                wei, self.wei_received
            ))
        })?;
        let tokens_issued = self.tokens_issued.checked_sub(tokens).ok_or_else(|| {
            SaleError::InconsistentState(format!(
                "burn of {} tokens exceeds tokens issued {}",
                tokens, self.tokens_issued
            ))
        })?;
        Ok(Totals {
            wei_received,
            tokens_issued,
        })
    }
}

/// Mutable sale singleton
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleState {
    lifecycle: Lifecycle,
    paused: bool,
    totals: Totals,
    finalized_at: Option<BlockNumber>,
    redeeming_at: Option<BlockNumber>,
    /// Highest block an accepted action ran at
    last_block: Option<BlockNumber>,
}

impl SaleState {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Fundraising,
            paused: false,
            totals: Totals::default(),
            finalized_at: None,
            redeeming_at: None,
            last_block: None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn finalized_at(&self) -> Option<BlockNumber> {
        self.finalized_at
    }

    pub fn redeeming_at(&self) -> Option<BlockNumber> {
        self.redeeming_at
    }

    pub fn last_block(&self) -> Option<BlockNumber> {
        self.last_block
    }

    pub(crate) fn observe_block(&mut self, block: BlockNumber) {
        self.last_block = Some(self.last_block.map_or(block, |last| last.max(block)));
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub(crate) fn record_contribution(&mut self, wei: &Amount, tokens: &Amount) {
        self.totals.wei_received = self.totals.wei_received.clone() + wei.clone();
        self.totals.tokens_issued = self.totals.tokens_issued.clone() + tokens.clone();
    }

    /// Replace the totals with the result of [`Totals::after_refund`]
    pub(crate) fn record_refund(&mut self, remaining: Totals) {
        self.totals = remaining;
    }

    /// Apply a forward transition; returns false and leaves the state alone otherwise
    pub(crate) fn advance(&mut self, next: Lifecycle, block: BlockNumber) -> bool {
        if !self.lifecycle.can_transition_to(next) {
            return false;
        }
        self.lifecycle = next;
        match next {
            Lifecycle::Finalized => {
                self.finalized_at = Some(block);
                // pausing only applies while fundraising
                self.paused = false;
            }
            Lifecycle::Redeeming => self.redeeming_at = Some(block),
            Lifecycle::Fundraising => {}
        }
        true
    }
}

impl Default for SaleState {
    fn default() -> Self {
        Self::new()
    }
}
