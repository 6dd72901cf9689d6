use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionResult};
use sled::{Batch, Transactional, Tree};
use std::collections::BTreeMap;

const UTXO_TREE: &str = "chainstate";
const UTXO_META_TREE: &str = "chainstate_meta";
const LAST_INDEXED_BLOCK_KEY: &str = "last_indexed_block";

/// One surviving output together with its position in the defining transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct IndexedOutput {
    index: usize,
    output: TXOutput,
}

impl IndexedOutput {
    pub fn new(index: usize, output: TXOutput) -> IndexedOutput {
        IndexedOutput { index, output }
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// The record stored under a transaction id: its outputs that no later input
/// references, in ascending index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct UnspentOutputs {
    outputs: Vec<IndexedOutput>,
}

impl UnspentOutputs {
    pub fn from_outputs(outputs: &[TXOutput]) -> UnspentOutputs {
        UnspentOutputs {
            outputs: outputs
                .iter()
                .cloned()
                .enumerate()
                .map(|(index, output)| IndexedOutput::new(index, output))
                .collect(),
        }
    }

    pub fn push(&mut self, output: IndexedOutput) {
        self.outputs.push(output);
        self.outputs.sort_by_key(IndexedOutput::get_index);
    }

    /// Drops the output at `index`; false if it was not in the record.
    pub fn remove(&mut self, index: usize) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|out| out.index != index);
        self.outputs.len() != before
    }

    pub fn outputs(&self) -> &[IndexedOutput] {
        self.outputs.as_slice()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<UnspentOutputs> {
        deserialize(bytes)
    }
}

/// Derived index of unspent outputs, kept in the `chainstate` tree of the
/// ledger's own database. It can always be rebuilt from the chain.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    fn meta_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_META_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO meta tree: {e}")))
    }

    /// Hash of the last block folded into the index, if any.
    pub fn get_last_indexed_block(&self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .meta_tree()?
            .get(LAST_INDEXED_BLOCK_KEY)?
            .map(|hash| hash.to_vec()))
    }

    /// Walks records in ascending txid order and stops as soon as the
    /// accumulated value covers `amount`. Returns original output indices.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<Vec<u8>, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<Vec<u8>, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0u64;

        'records: for item in self.utxo_tree()?.iter() {
            let (txid, bytes) = item?;
            let record = UnspentOutputs::deserialize(bytes.as_ref())?;

            for out in record.outputs() {
                // I stop as soon as the amount is covered, the rest stays untouched
                if accumulated >= amount {
                    break 'records;
                }
                if out.output.is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.output.get_value());
                    unspent_outputs
                        .entry(txid.to_vec())
                        .or_default()
                        .push(out.index);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for item in self.utxo_tree()?.iter() {
            let (_, bytes) = item?;
            let record = UnspentOutputs::deserialize(bytes.as_ref())?;
            utxos.extend(
                record
                    .outputs
                    .into_iter()
                    .map(|out| out.output)
                    .filter(|out| out.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .fold(0u64, |total, out| total.saturating_add(out.get_value())))
    }

    /// Every index record, keyed by txid.
    pub fn get_records(&self) -> Result<BTreeMap<Vec<u8>, UnspentOutputs>> {
        let mut records = BTreeMap::new();
        for item in self.utxo_tree()?.iter() {
            let (txid, bytes) = item?;
            records.insert(txid.to_vec(), UnspentOutputs::deserialize(bytes.as_ref())?);
        }
        Ok(records)
    }

    /// Number of transactions that still have at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let mut counter = 0;
        for item in self.utxo_tree()?.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Rebuilds the index from the chain. Old records, new records and the
    /// last-indexed marker are swapped in one transaction.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let meta_tree = self.meta_tree()?;

        let tip_hash = self.blockchain.get_tip_hash();
        let utxo_map = self.blockchain.find_utxo()?;

        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, record) in &utxo_map {
            batch.insert(txid.as_slice(), record.serialize()?);
        }

        let result: TransactionResult<(), BlockchainError> =
            (&utxo_tree, &meta_tree).transaction(|(utxo, meta)| {
                utxo.apply_batch(&batch)?;
                meta.insert(LAST_INDEXED_BLOCK_KEY, tip_hash.as_slice())?;
                Ok(())
            });
        result?;
        utxo_tree.flush()?;

        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs, tip {}",
            utxo_map.len(),
            HEXLOWER.encode(&tip_hash)
        );
        Ok(())
    }

    /// Folds one appended block into the index.
    ///
    /// Blocks must arrive in chain order: the block's parent has to be the
    /// last indexed block. Re-applying the last indexed block is a no-op.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let meta_tree = self.meta_tree()?;

        // I only fold a block whose parent is the last one I indexed; anything
        // else means the index missed a block and needs a reindex
        match self.get_last_indexed_block()? {
            Some(last) if last.as_slice() == block.get_hash() => {
                warn!(
                    "Block {} is already indexed, skipping update",
                    HEXLOWER.encode(block.get_hash())
                );
                return Ok(());
            }
            Some(last) if last.as_slice() == block.get_pre_block_hash() => {}
            None if block.is_genesis() => {}
            last => {
                return Err(BlockchainError::IndexOutOfOrder {
                    expected: last
                        .map(|hash| HEXLOWER.encode(&hash))
                        .unwrap_or_else(|| "<genesis>".to_string()),
                    actual: HEXLOWER.encode(block.get_pre_block_hash()),
                });
            }
        }

        (&utxo_tree, &meta_tree).transaction(|(utxo, meta)| {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        let outpoint = format!("{}:{}", HEXLOWER.encode(vin.get_txid()), vin.get_vout());
                        let bytes = utxo.get(vin.get_txid())?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(
                                BlockchainError::IndexRecordMissing(outpoint.clone()),
                            )
                        })?;
                        let mut record = UnspentOutputs::deserialize(bytes.as_ref())
                            .map_err(ConflictableTransactionError::Abort)?;

                        // Critical: drop by original index, positions shift once a record shrinks
                        let removed = vin
                            .output_index()
                            .is_some_and(|index| record.remove(index));
                        if !removed {
                            return Err(ConflictableTransactionError::Abort(
                                BlockchainError::IndexRecordMissing(outpoint),
                            ));
                        }

                        if record.is_empty() {
                            utxo.remove(vin.get_txid())?;
                        } else {
                            let bytes = record
                                .serialize()
                                .map_err(ConflictableTransactionError::Abort)?;
                            utxo.insert(vin.get_txid(), bytes)?;
                        }
                    }
                }

                let record = UnspentOutputs::from_outputs(tx.get_vout());
                if !record.is_empty() {
                    let bytes = record
                        .serialize()
                        .map_err(ConflictableTransactionError::Abort)?;
                    utxo.insert(tx.get_id(), bytes)?;
                }
            }
            meta.insert(LAST_INDEXED_BLOCK_KEY, block.get_hash())?;
            Ok(())
        })?;
        utxo_tree.flush()?;

        debug!(
            "Indexed block {} ({} transactions)",
            HEXLOWER.encode(block.get_hash()),
            block.get_transactions().len()
        );
        Ok(())
    }
}
