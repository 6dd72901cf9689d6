// The ledger: an append-only chain of mined blocks persisted in sled.
// The `blocks` tree maps raw block hash -> encoded block, plus a few
// sentinel keys: the tip pointer and the chain parameters fixed at creation.

use crate::config::Config;
use crate::core::transaction::collect_prior_transactions;
use crate::core::{Block, ProofOfWork, TXInput, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{IndexedOutput, UnspentOutputs};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const TARGET_BITS_KEY: &str = "target_bits";
const SUBSIDY_KEY: &str = "subsidy";
const BLOCKS_TREE: &str = "blocks";

const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    db_path: PathBuf,
    target_bits: u32,
    subsidy: u64,
}

impl Blockchain {
    /// Creates a new chain at `config.db_path()` whose genesis coinbase pays
    /// `genesis_address`. Fails if a chain already exists there.
    pub fn create_blockchain(genesis_address: &str, config: &Config) -> Result<Blockchain> {
        config.validate()?;
        let path = config.db_path();
        let db = sled::open(&path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        if blocks_tree.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Err(BlockchainError::ChainExists(path.display().to_string()));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx =
            Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA, config.get_subsidy())?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, config.get_target_bits())?;
        let block_data = genesis.serialize()?;

        blocks_tree.transaction(|tx_db| {
            if tx_db.get(TIP_BLOCK_HASH_KEY)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    BlockchainError::ChainExists(path.display().to_string()),
                ));
            }
            tx_db.insert(genesis.get_hash(), block_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
            tx_db.insert(TARGET_BITS_KEY, config.get_target_bits().to_be_bytes().to_vec())?;
            tx_db.insert(SUBSIDY_KEY, config.get_subsidy().to_be_bytes().to_vec())?;
            Ok(())
        })?;
        blocks_tree.flush()?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            db_path: path,
            target_bits: config.get_target_bits(),
            subsidy: config.get_subsidy(),
        })
    }

    /// Opens the chain at `config.db_path()`.
    pub fn new_blockchain(config: &Config) -> Result<Blockchain> {
        Self::new_blockchain_with_path(&config.db_path())
    }

    /// Attaches to an existing chain. The target bits and subsidy come from
    /// the store, not from the caller.
    pub fn new_blockchain_with_path(db_path: &Path) -> Result<Blockchain> {
        if !db_path.exists() {
            return Err(BlockchainError::ChainMissing(db_path.display().to_string()));
        }
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::ChainMissing(db_path.display().to_string()))?
            .to_vec();

        let target_bits = read_param::<4>(&blocks_tree, TARGET_BITS_KEY).map(u32::from_be_bytes)?;
        let subsidy = read_param::<8>(&blocks_tree, SUBSIDY_KEY).map(u64::from_be_bytes)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            db_path: db_path.to_path_buf(),
            target_bits,
            subsidy,
        })
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_subsidy(&self) -> u64 {
        self.subsidy
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *tip_hash = new_tip_hash.to_vec();
    }

    fn blocks_tree(&self) -> Result<Tree> {
        self.db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))
    }

    /// Appends a block holding exactly `transactions`.
    ///
    /// Every transaction is verified against the chain, may only consume
    /// outputs no block has spent yet, and may not pay out more than it
    /// consumes. The batch may not spend one output twice either; a rejected
    /// batch mines nothing. Callers must not append concurrently to the same
    /// store.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        // I collect everything the chain has already spent in one backward walk,
        // so each input below is a set lookup instead of another scan
        let spent_on_chain = self.spent_outputs()?;

        for (i, transaction) in transactions.iter().enumerate() {
            if !self.verify_transaction(transaction)? {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
            self.validate_transaction_inputs(transaction, &spent_on_chain)?;
        }
        // Critical: two inputs of this batch must not consume the same output
        check_for_double_spending(transactions)?;

        let blocks_tree = self.blocks_tree()?;
        let tip_hash = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::ChainMissing(self.db_path.display().to_string()))?
            .to_vec();

        let block = Block::new_block(&tip_hash, transactions, self.target_bits)?;
        let block_data = block.serialize()?;

        // I write the block and move the tip together, or not at all
        blocks_tree.transaction(|tx_db| {
            let current_tip = tx_db.get(TIP_BLOCK_HASH_KEY)?;
            if current_tip.as_deref() != Some(tip_hash.as_slice()) {
                return Err(ConflictableTransactionError::Abort(
                    BlockchainError::InvalidBlock(
                        "Chain tip moved while the block was being mined".to_string(),
                    ),
                ));
            }
            tx_db.insert(block.get_hash(), block_data.as_slice())?;
            tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
            Ok(())
        })?;
        blocks_tree.flush()?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Appended block {} with {} transactions",
            HEXLOWER.encode(block.get_hash()),
            transactions.len()
        );
        Ok(block)
    }

    /// Like [`Blockchain::mine_block`] but prepends a coinbase paying
    /// `miner_address` the chain subsidy.
    pub fn mine_block_with_reward(
        &self,
        transactions: &[Transaction],
        miner_address: &str,
    ) -> Result<Block> {
        let memo = format!("Reward to '{miner_address}' ({})", Uuid::new_v4());
        let coinbase_tx = Transaction::new_coinbase_tx(miner_address, &memo, self.subsidy)?;

        let mut block_transactions = Vec::with_capacity(transactions.len() + 1);
        block_transactions.push(coinbase_tx);
        block_transactions.extend_from_slice(transactions);
        self.mine_block(&block_transactions)
    }

    /// Walks from the tip back to genesis, one store read per block.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.blocks_tree()?.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }

    /// Visits every transaction from the tip back to genesis. Inside a block
    /// transactions are visited last-to-first, so a spend is always seen
    /// before the output it consumes.
    fn walk_transactions<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Transaction) -> ControlFlow<()>,
    {
        for block in self.iterator() {
            let block = block?;
            // I go last-to-first inside the block too, otherwise a spend of an
            // output created earlier in the same block would be seen too late
            for tx in block.get_transactions().iter().rev() {
                if visit(tx).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Every output referenced by some non-coinbase input on the chain.
    fn spent_outputs(&self) -> Result<SpentOutputs> {
        let mut spent = SpentOutputs::default();
        self.walk_transactions(|tx| {
            spent.record(tx, |_| true);
            ControlFlow::Continue(())
        })?;
        Ok(spent)
    }

    /// Checks that `transaction` only consumes outputs still unspent on the
    /// chain and that its outputs do not exceed the value it consumes.
    fn validate_transaction_inputs(
        &self,
        transaction: &Transaction,
        spent_on_chain: &SpentOutputs,
    ) -> Result<()> {
        if transaction.is_coinbase() {
            return Ok(());
        }

        for input in transaction.get_vin() {
            // I refuse any input pointing at an output some block already consumed
            let already_spent = input
                .output_index()
                .map_or(true, |idx| spent_on_chain.is_spent(input.get_txid(), idx));
            if already_spent {
                return Err(BlockchainError::Transaction(format!(
                    "Input already spent: {}:{}",
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                )));
            }
        }

        // I also make sure no value gets created out of thin air
        let prev_txs = collect_prior_transactions(transaction, self)?;
        let input_value = transaction.get_input_value(&prev_txs)?;
        let output_value = transaction.get_output_value()?;
        if output_value > input_value {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} pays out {output_value} but only consumes {input_value}",
                HEXLOWER.encode(transaction.get_id())
            )));
        }
        Ok(())
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        let mut found = None;
        self.walk_transactions(|tx| {
            if tx.get_id() == txid {
                found = Some(tx.clone());
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Transactions holding at least one unspent output locked to `pub_key_hash`.
    pub fn find_unspent_transactions(&self, pub_key_hash: &[u8]) -> Result<Vec<Transaction>> {
        let mut unspent_txs = vec![];
        let mut spent = SpentOutputs::default();

        self.walk_transactions(|tx| {
            let has_unspent = tx.get_vout().iter().enumerate().any(|(idx, out)| {
                out.is_locked_with_key(pub_key_hash) && !spent.is_spent(tx.get_id(), idx)
            });
            if has_unspent {
                unspent_txs.push(tx.clone());
            }
            // only this key's spends matter; anyone else's inputs can't touch its outputs
            spent.record(tx, |vin| vin.uses_key(pub_key_hash));
            ControlFlow::Continue(())
        })?;
        Ok(unspent_txs)
    }

    /// Every unspent output on the chain, grouped by transaction id.
    pub fn find_utxo(&self) -> Result<HashMap<Vec<u8>, UnspentOutputs>> {
        let mut utxo: HashMap<Vec<u8>, UnspentOutputs> = HashMap::new();
        let mut spent = SpentOutputs::default();

        self.walk_transactions(|tx| {
            for (idx, out) in tx.get_vout().iter().enumerate() {
                if spent.is_spent(tx.get_id(), idx) {
                    continue;
                }
                utxo.entry(tx.get_id().to_vec())
                    .or_default()
                    .push(IndexedOutput::new(idx, out.clone()));
            }
            spent.record(tx, |_| true);
            ControlFlow::Continue(())
        })?;
        Ok(utxo)
    }

    /// Sum of the unspent outputs locked to `pub_key_hash`, computed from
    /// the chain alone (no index).
    pub fn find_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        let mut balance = 0u64;
        let mut spent = SpentOutputs::default();

        self.walk_transactions(|tx| {
            for (idx, out) in tx.get_vout().iter().enumerate() {
                if out.is_locked_with_key(pub_key_hash) && !spent.is_spent(tx.get_id(), idx) {
                    balance = balance.saturating_add(out.get_value());
                }
            }
            spent.record(tx, |_| true);
            ControlFlow::Continue(())
        })?;
        Ok(balance)
    }

    /// Signs `tx` with `pkcs8`, resolving its inputs through the chain.
    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        let prev_txs = collect_prior_transactions(tx, self)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = collect_prior_transactions(tx, self)?;
        tx.verify(&prev_txs)
    }

    /// Re-checks every block from the tip: it is stored under its own hash,
    /// the hash is reproduced by its nonce and meets the target, and it links
    /// to the next block down.
    pub fn audit(&self) -> Result<bool> {
        let pow = ProofOfWork::new(self.target_bits);
        let mut expected_hash = self.get_tip_hash();

        for block in self.iterator() {
            let block = block?;
            if block.get_hash() != expected_hash.as_slice() || !pow.validate(&block) {
                debug!("Audit failed at block {}", HEXLOWER.encode(block.get_hash()));
                return Ok(false);
            }
            let recomputed = sha256_digest(&pow.prepare_data(&block, block.get_nonce())?);
            if recomputed != block.get_hash() {
                debug!("Stored hash mismatch at block {}", HEXLOWER.encode(block.get_hash()));
                return Ok(false);
            }
            expected_hash = block.get_pre_block_hash().to_vec();
        }
        Ok(expected_hash.is_empty())
    }
}

fn read_param<const N: usize>(tree: &Tree, key: &str) -> Result<[u8; N]> {
    let bytes = tree
        .get(key)?
        .ok_or_else(|| BlockchainError::Database(format!("Chain parameter '{key}' is missing")))?;
    bytes
        .as_ref()
        .try_into()
        .map_err(|_| BlockchainError::Database(format!("Chain parameter '{key}' is malformed")))
}

// Rejects a batch in which two inputs consume the same output.
fn check_for_double_spending(transactions: &[Transaction]) -> Result<()> {
    let mut spent_outputs: HashSet<(&[u8], i64)> = HashSet::new();

    for (tx_index, transaction) in transactions.iter().enumerate() {
        if transaction.is_coinbase() {
            continue;
        }
        for input in transaction.get_vin() {
            if !spent_outputs.insert((input.get_txid(), input.get_vout())) {
                return Err(BlockchainError::Transaction(format!(
                    "Double-spending detected in transaction {}: output {}:{} already spent in this block",
                    tx_index,
                    HEXLOWER.encode(input.get_txid()),
                    input.get_vout()
                )));
            }
        }
    }
    Ok(())
}

/// Output references consumed by inputs seen so far in a backward walk.
#[derive(Default)]
struct SpentOutputs {
    spent: HashMap<Vec<u8>, HashSet<i64>>,
}

impl SpentOutputs {
    fn is_spent(&self, txid: &[u8], idx: usize) -> bool {
        self.spent
            .get(txid)
            .is_some_and(|outs| outs.contains(&(idx as i64)))
    }

    fn record<P>(&mut self, tx: &Transaction, include: P)
    where
        P: Fn(&TXInput) -> bool,
    {
        if tx.is_coinbase() {
            return;
        }
        for vin in tx.get_vin().iter().filter(|vin| include(vin)) {
            self.spent
                .entry(vin.get_txid().to_vec())
                .or_default()
                .insert(vin.get_vout());
        }
    }
}

pub struct BlockchainIterator {
    db: Db,
    current_hash: Vec<u8>,
    finished: bool,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            finished: tip_hash.is_empty(),
            current_hash: tip_hash,
            db,
        }
    }

    fn load_current(&self) -> Result<Block> {
        let block_tree = self.db.open_tree(BLOCKS_TREE)?;
        let data = block_tree.get(&self.current_hash)?.ok_or_else(|| {
            BlockchainError::InvalidBlock(format!(
                "Block {} referenced by the chain is missing",
                HEXLOWER.encode(&self.current_hash)
            ))
        })?;
        Block::deserialize(data.as_ref())
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.load_current() {
            Ok(block) => {
                if block.is_genesis() {
                    self.finished = true;
                } else {
                    self.current_hash = block.get_pre_block_hash().to_vec();
                }
                Some(Ok(block))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
