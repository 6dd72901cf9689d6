// Transactions follow the UTXO model: every input consumes one earlier output,
// every output is locked to the RIPEMD-160(SHA-256(pubkey)) of its recipient.

use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i64 = -1;

/// Previously confirmed transactions keyed by their id, as needed to sign
/// or verify the inputs that spend them.
pub type PriorTransactions = HashMap<Vec<u8>, Transaction>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    /// An unsigned input spending output `vout` of transaction `txid`.
    pub fn new(txid: &[u8], vout: usize, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase placeholder.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// An output of `value` locked to the public-key hash inside `address`.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn new_locked(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds an unsigned transaction from explicit inputs and outputs and sets its id.
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.set_id()?;
        Ok(tx)
    }

    /// The block-reward transaction. `memo` fills the public-key slot of the
    /// placeholder input and is never verified; an empty memo is replaced by
    /// a default naming the recipient.
    pub fn new_coinbase_tx(to: &str, memo: &str, subsidy: u64) -> Result<Transaction> {
        let memo = if memo.is_empty() {
            format!("Reward to '{to}'")
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: memo.into_bytes(),
        };
        let txout = TXOutput::new(subsidy, to)?;

        Transaction::new(vec![tx_input], vec![txout])
    }

    /// Spends `amount` from `wallet` to `to`, selecting inputs through the
    /// UTXO index and returning change to the sender. Fails before anything
    /// is signed when the wallet cannot fund the amount.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        let to_pub_key_hash = address_to_pub_key_hash(to)?;

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid, outs) in valid_outputs {
            for out in outs {
                inputs.push(TXInput::new(&txid, out, wallet.get_public_key()));
            }
        }

        let mut outputs = vec![TXOutput::new_locked(amount, &to_pub_key_hash)];
        // whatever the selected outputs hold beyond `amount` comes back as change
        if accumulated > amount {
            outputs.push(TXOutput::new_locked(accumulated - amount, &public_key_hash));
        }

        let mut tx = Transaction::new(inputs, outputs)?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the canonical encoding with the id left empty.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn set_id(&mut self) -> Result<()> {
        self.id = self.hash()?;
        Ok(())
    }

    /// Copy with every input's signature and public key cleared.
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();

        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Signs every input independently. For input `i` the trimmed copy
    /// carries, in input `i`'s key slot only, the hash locking the output
    /// it spends.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PriorTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.check_prior_transactions(prev_txs)?;

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let locking_hash = Self::referenced_output(&self.vin[idx], prev_txs)?
                .get_pub_key_hash()
                .to_vec();

            // I put the spent output's lock into this input's slot only, then
            // clear it again so the next input signs its own payload
            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = locking_hash;
            let payload = tx_copy.signing_payload()?;
            tx_copy.vin[idx].pub_key = vec![];

            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &payload)?;
        }
        Ok(())
    }

    /// `Ok(false)` as soon as one input fails; `Err` only when a referenced
    /// prior transaction was not supplied.
    pub fn verify(&self, prev_txs: &PriorTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.check_prior_transactions(prev_txs)?;

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let output = match Self::referenced_output(vin, prev_txs) {
                Ok(output) => output,
                Err(_) => return Ok(false),
            };

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = output.get_pub_key_hash().to_vec();
            let payload = tx_copy.signing_payload()?;
            tx_copy.vin[idx].pub_key = vec![];

            if !ecdsa_p256_sha256_sign_verify(&vin.pub_key, &vin.signature, &payload) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The exact bytes that get signed: lowercase hex of the encoded copy.
    fn signing_payload(&self) -> Result<Vec<u8>> {
        Ok(HEXLOWER.encode(&self.serialize()?).into_bytes())
    }

    fn check_prior_transactions(&self, prev_txs: &PriorTransactions) -> Result<()> {
        for vin in &self.vin {
            if !prev_txs.contains_key(vin.get_txid()) {
                return Err(BlockchainError::MissingPriorTransaction(
                    HEXLOWER.encode(vin.get_txid()),
                ));
            }
        }
        Ok(())
    }

    fn referenced_output<'a>(vin: &TXInput, prev_txs: &'a PriorTransactions) -> Result<&'a TXOutput> {
        let prev_tx = prev_txs.get(vin.get_txid()).ok_or_else(|| {
            BlockchainError::MissingPriorTransaction(HEXLOWER.encode(vin.get_txid()))
        })?;
        vin.output_index()
            .and_then(|idx| prev_tx.vout.get(idx))
            .ok_or_else(|| BlockchainError::InvalidOutputIndex {
                txid: HEXLOWER.encode(vin.get_txid()),
                vout: vin.get_vout(),
            })
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Total value of the outputs this transaction consumes. Zero for coinbase.
    pub fn get_input_value(&self, prev_txs: &PriorTransactions) -> Result<u64> {
        if self.is_coinbase() {
            return Ok(0);
        }
        self.vin.iter().try_fold(0u64, |total, vin| {
            let value = Self::referenced_output(vin, prev_txs)?.get_value();
            total
                .checked_add(value)
                .ok_or_else(|| BlockchainError::Transaction("Input value overflow".to_string()))
        })
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.get_value())
                .ok_or_else(|| BlockchainError::Transaction("Output value overflow".to_string()))
        })
    }
}

/// Resolves every input's source transaction through the ledger.
pub(crate) fn collect_prior_transactions(
    tx: &Transaction,
    blockchain: &Blockchain,
) -> Result<PriorTransactions> {
    let mut prev_txs = PriorTransactions::new();
    for vin in tx.get_vin() {
        if prev_txs.contains_key(vin.get_txid()) {
            continue;
        }
        let prev_tx = blockchain.find_transaction(vin.get_txid())?.ok_or_else(|| {
            BlockchainError::MissingPriorTransaction(HEXLOWER.encode(vin.get_txid()))
        })?;
        prev_txs.insert(vin.get_txid().to_vec(), prev_tx);
    }
    Ok(prev_txs)
}
