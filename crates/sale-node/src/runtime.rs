// sale-node/src/runtime.rs
use crate::NodeConfig;
use anyhow::Context;
use sale_core::{Address, Amount, BlockNumber};
use serde::{Deserialize, Serialize};
use std::path::Path;
use token_sale::{
    Action, CallContext, Effect, InMemorySettlement, Lifecycle, SaleResult, SaleSnapshot,
    TokenSale,
};

/// One scripted call against the sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub block: BlockNumber,
    pub caller: Address,
    #[serde(default)]
    pub value: Amount,
    pub action: Action,
}

impl ScriptStep {
    pub fn context(&self) -> CallContext {
        CallContext::new(self.caller, self.block).with_value(self.value.clone())
    }
}

/// Result of one replayed step
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub block: BlockNumber,
    pub caller: Address,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn accepted(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: usize,
    pub outcomes: Vec<StepOutcome>,
    pub snapshot: SaleSnapshot,
}

/// Sale plus the settlement it moves value through; this pair is what gets persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub sale: TokenSale,
    pub settlement: InMemorySettlement,
}

impl NodeState {
    /// Fresh sale with genesis balances credited
    pub fn genesis(config: &NodeConfig) -> anyhow::Result<Self> {
        let sale = TokenSale::new(config.sale.clone())?;
        let mut settlement = InMemorySettlement::new();
        for account in &config.genesis {
            settlement.fund(account.address, account.balance.clone());
        }

        tracing::info!(
            "Genesis: {} funded accounts, total {} wei",
            config.genesis.len(),
            settlement.total_value()
        );

        Ok(Self { sale, settlement })
    }

    /// Persisted state at `path` if it exists, genesis otherwise
    pub fn open<P: AsRef<Path>>(config: &NodeConfig, path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::genesis(config);
        }

        let state = Self::load(path)?;
        if state.sale.config() != &config.sale {
            tracing::warn!(
                "Sale parameters in {} differ from the configuration; keeping the persisted ones",
                path.display()
            );
        }
        Ok(state)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading sale state from {}", path.display()))?;
        let state: NodeState = bincode::deserialize(&bytes)
            .with_context(|| format!("decoding sale state from {}", path.display()))?;
        state.validate()?;

        tracing::info!(
            "Loaded sale from {} ({}, {} holders)",
            path.display(),
            state.sale.state(),
            state.sale.ledger().holder_count()
        );
        Ok(state)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(self)?;
        std::fs::write(path, bytes)
            .with_context(|| format!("writing sale state to {}", path.display()))?;

        tracing::debug!("Saved sale state to {}", path.display());
        Ok(())
    }

    /// Sale invariants plus escrow coverage
    pub fn validate(&self) -> anyhow::Result<()> {
        self.sale.validate_restored()?;

        // until finalize releases it, every contributed wei sits in escrow
        if self.sale.state() == Lifecycle::Fundraising
            && self.settlement.escrow_balance() != self.sale.total_wei_received()
        {
            anyhow::bail!(
                "escrow {} does not match wei received {}",
                self.settlement.escrow_balance(),
                self.sale.total_wei_received()
            );
        }
        Ok(())
    }

    pub fn apply(&mut self, step: &ScriptStep) -> SaleResult<Effect> {
        self.sale
            .execute(&step.context(), &step.action, &mut self.settlement)
    }

    /// Run every step in order; rejected steps are recorded and skipped
    pub fn replay(&mut self, steps: &[ScriptStep]) -> ReplayReport {
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut applied = 0;

        for (index, step) in steps.iter().enumerate() {
            let outcome = match self.apply(step) {
                Ok(effect) => {
                    applied += 1;
                    tracing::info!(
                        "#{} block {} {}: {:?}",
                        index,
                        step.block,
                        step.caller,
                        effect
                    );
                    StepOutcome {
                        index,
                        block: step.block,
                        caller: step.caller,
                        action: step.action.clone(),
                        effect: Some(effect),
                        error: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "#{} block {} {}: {:?} rejected: {}",
                        index,
                        step.block,
                        step.caller,
                        step.action,
                        err
                    );
                    StepOutcome {
                        index,
                        block: step.block,
                        caller: step.caller,
                        action: step.action.clone(),
                        effect: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        ReplayReport {
            applied,
            rejected: steps.len() - applied,
            outcomes,
            snapshot: self.sale.snapshot(),
        }
    }
}

/// Parse a JSON array of steps. Block heights must not decrease.
pub fn parse_script(json: &str) -> anyhow::Result<Vec<ScriptStep>> {
    let steps: Vec<ScriptStep> = serde_json::from_str(json)?;
    for (index, pair) in steps.windows(2).enumerate() {
        if pair[1].block < pair[0].block {
            anyhow::bail!(
                "step {} goes back from block {} to block {}",
                index + 1,
                pair[0].block,
                pair[1].block
            );
        }
    }
    Ok(steps)
}

pub fn load_script<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<ScriptStep>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    parse_script(&contents)
}
