use crate::error::{BlockchainError, Result};
use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

/// Process-wide configuration read once from the environment.
/// Library code never reads it; callers pass a `Config` explicitly.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

pub const DEFAULT_TARGET_BITS: u32 = 24;
pub const DEFAULT_SUBSIDY: u64 = 10;
static DEFAULT_DATA_DIR: &str = "data";

const DATA_DIR_KEY: &str = "BLOCKCHAIN_DATA_DIR";
const NODE_ID_KEY: &str = "NODE_ID";
const TARGET_BITS_KEY: &str = "TARGET_BITS";
const SUBSIDY_KEY: &str = "SUBSIDY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    data_dir: PathBuf,
    node_id: Option<String>,
    target_bits: u32,
    subsidy: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            node_id: None,
            target_bits: DEFAULT_TARGET_BITS,
            subsidy: DEFAULT_SUBSIDY,
        }
    }
}

impl Config {
    /// Reads the environment, falling back to defaults for unset or
    /// unparsable values. Use [`Config::validate`] before creating a chain.
    pub fn from_env() -> Config {
        let mut config = Config::default();

        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            if !node_id.is_empty() {
                config.node_id = Some(node_id);
            }
        }
        if let Some(bits) = env::var(TARGET_BITS_KEY).ok().and_then(|v| v.parse().ok()) {
            config.target_bits = bits;
        }
        if let Some(subsidy) = env::var(SUBSIDY_KEY).ok().and_then(|v| v.parse().ok()) {
            config.subsidy = subsidy;
        }
        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Config {
        self.data_dir = dir.into();
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Config {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_target_bits(mut self, bits: u32) -> Config {
        self.target_bits = bits;
        self
    }

    pub fn with_subsidy(mut self, subsidy: u64) -> Config {
        self.subsidy = subsidy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.target_bits) {
            return Err(BlockchainError::Config(format!(
                "target_bits must be within 1..=255, got {}",
                self.target_bits
            )));
        }
        Ok(())
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_subsidy(&self) -> u64 {
        self.subsidy
    }

    /// Directory holding this node's files (`data/` or `data/node_<id>/`).
    pub fn node_dir(&self) -> PathBuf {
        match &self.node_id {
            Some(id) => self.data_dir.join(format!("node_{id}")),
            None => self.data_dir.clone(),
        }
    }

    /// Location of the sled store; this is the ledger identity.
    pub fn db_path(&self) -> PathBuf {
        self.node_dir().join("blockchain")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.node_dir().join(crate::wallet::WALLET_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.get_target_bits(), 24);
        assert_eq!(config.get_subsidy(), 10);
        assert_eq!(config.db_path(), PathBuf::from("data").join("blockchain"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_node_scoped_paths() {
        let config = Config::default().with_data_dir("/tmp/x").with_node_id("3000");
        assert_eq!(config.node_dir(), PathBuf::from("/tmp/x/node_3000"));
        assert_eq!(
            config.wallet_path(),
            PathBuf::from("/tmp/x/node_3000/wallet.dat")
        );
    }

    #[test]
    fn test_validate_rejects_bad_target() {
        assert!(Config::default().with_target_bits(0).validate().is_err());
        assert!(Config::default().with_target_bits(256).validate().is_err());
        assert!(Config::default().with_target_bits(255).validate().is_ok());
    }
}
