// sale-node/src/lib.rs
pub mod config;
pub mod runtime;

pub use config::{GenesisAccount, LoggingConfig, NodeConfig};
pub use runtime::{NodeState, ReplayReport, ScriptStep, StepOutcome};
