// token-sale/src/events.rs

use crate::policy::RatePhase;
use sale_core::{Address, Amount, BlockNumber};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of events kept before the oldest are evicted
pub const MAX_EVENTS: usize = 10_000;

/// Record of a successful action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleEvent {
    Contributed {
        contributor: Address,
        wei: Amount,
        tokens: Amount,
        phase: RatePhase,
        block: BlockNumber,
    },
    Finalized {
        released: Amount,
        tokens_issued: Amount,
        block: BlockNumber,
    },
    RedeemingStarted {
        block: BlockNumber,
    },
    Refunded {
        contributor: Address,
        burned: Amount,
        returned: Amount,
        block: BlockNumber,
    },
    Transferred {
        from: Address,
        to: Address,
        amount: Amount,
        block: BlockNumber,
    },
    Paused {
        block: BlockNumber,
    },
    Unpaused {
        block: BlockNumber,
    },
}

impl SaleEvent {
    pub fn block(&self) -> BlockNumber {
        match self {
            SaleEvent::Contributed { block, .. }
            | SaleEvent::Finalized { block, .. }
            | SaleEvent::RedeemingStarted { block }
            | SaleEvent::Refunded { block, .. }
            | SaleEvent::Transferred { block, .. }
            | SaleEvent::Paused { block }
            | SaleEvent::Unpaused { block } => *block,
        }
    }
}

/// Bounded in-memory event history, oldest first
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<SaleEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: SaleEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaleEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&SaleEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }
}
