use crate::error::Result;
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::debug;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// The set of wallets owned by one node, persisted as a single bincode file.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty if it does not exist.
    pub fn load(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            path: path.to_path_buf(),
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf[..])?;
        debug!("Loaded {} wallets from {}", self.wallets.len(), self.path.display());
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallets_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node").join(WALLET_FILE);

        let mut wallets = Wallets::load(&path).unwrap();
        assert!(wallets.get_addresses().is_empty());
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();

        let reloaded = Wallets::load(&path).unwrap();
        let addresses = reloaded.get_addresses();
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains(&first) && addresses.contains(&second));

        let original = wallets.get_wallet(&first).unwrap();
        let restored = reloaded.get_wallet(&first).unwrap();
        assert_eq!(original.get_public_key(), restored.get_public_key());
        assert!(reloaded.get_wallet("missing").is_none());
    }
}
