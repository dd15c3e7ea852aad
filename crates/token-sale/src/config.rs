// token-sale/src/config.rs

use crate::{SaleError, SaleResult};
use sale_core::{Address, Amount, BlockNumber, ExchangeRate};
use serde::{Deserialize, Serialize};

/// Fund deposit used by the default configuration
pub const DEFAULT_FUND_DEPOSIT: [u8; 20] = [
    0x2a, 0xac, 0xac, 0x14, 0x12, 0x06, 0x2c, 0xaa, 0xf7, 0x0b, 0x5a, 0x6e, 0xb6, 0x75, 0x2b,
    0xa6, 0xe8, 0xe5, 0x11, 0x7f,
];

/// Immutable sale parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfig {
    /// Privileged identity that finalizes and receives the raise
    pub fund_deposit: Address,
    /// First block accepting contributions
    pub funding_start_block: BlockNumber,
    /// First block priced at `rate_second`
    pub exchange_rate_changes_block: BlockNumber,
    /// First block no longer accepting contributions
    pub funding_end_block: BlockNumber,
    /// Tokens per wei before the rate change
    pub rate_first: ExchangeRate,
    /// Tokens per wei from the rate change on
    pub rate_second: ExchangeRate,
    /// Hard ceiling on wei received
    pub eth_received_cap: Amount,
    /// Wei needed for the sale to succeed
    pub eth_received_min: Amount,
    /// Hard ceiling on tokens issued
    pub token_creation_cap: Amount,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            fund_deposit: Address::new(DEFAULT_FUND_DEPOSIT),
            funding_start_block: 10,
            exchange_rate_changes_block: 15,
            funding_end_block: 20,
            rate_first: 500,
            rate_second: 400,
            eth_received_cap: Amount::ether(100_000),
            eth_received_min: Amount::ether(10_000),
            token_creation_cap: Amount::ether(50_000_000), // 50M tokens, 18 decimals
        }
    }
}

impl SaleConfig {
    /// Check schedule ordering and that rates and caps are positive
    pub fn validate(&self) -> SaleResult<()> {
        if self.funding_start_block >= self.exchange_rate_changes_block {
            return Err(SaleError::InvalidConfig(
                "funding_start_block must be before exchange_rate_changes_block".into(),
            ));
        }
        if self.exchange_rate_changes_block >= self.funding_end_block {
            return Err(SaleError::InvalidConfig(
                "exchange_rate_changes_block must be before funding_end_block".into(),
            ));
        }
        if self.rate_first == 0 || self.rate_second == 0 {
            return Err(SaleError::InvalidConfig("exchange rates must be > 0".into()));
        }
        if self.eth_received_cap.is_zero()
            || self.eth_received_min.is_zero()
            || self.token_creation_cap.is_zero()
        {
            return Err(SaleError::InvalidConfig("caps must be > 0".into()));
        }
        if self.eth_received_min > self.eth_received_cap {
            return Err(SaleError::InvalidConfig(
                "eth_received_min must not exceed eth_received_cap".into(),
            ));
        }
        Ok(())
    }

    /// Whether contributions are accepted at `block`
    pub fn in_funding_window(&self, block: BlockNumber) -> bool {
        self.funding_start_block <= block && block < self.funding_end_block
    }

    pub fn funding_ended(&self, block: BlockNumber) -> bool {
        block >= self.funding_end_block
    }
}
