// sale-node/src/config.rs
use sale_core::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::path::Path;
use token_sale::SaleConfig;

/// File name of the persisted sale inside `data_dir`
pub const STATE_FILE: &str = "sale.bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    pub sale: SaleConfig,
    /// External balances credited to the settlement before the first action
    #[serde(default)]
    pub genesis: Vec<GenesisAccount>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            sale: SaleConfig::default(),
            genesis: (1..=4)
                .map(|n| GenesisAccount {
                    address: Address::from_low_u64(n),
                    balance: Amount::ether(1_000_000),
                })
                .collect(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        config.sale.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default location of the persisted sale
    pub fn state_path(&self) -> std::path::PathBuf {
        Path::new(&self.data_dir).join(STATE_FILE)
    }
}
