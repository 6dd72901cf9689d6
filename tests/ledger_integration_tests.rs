//! Ledger integration tests
//!
//! End-to-end flows over a temp-dir sled store: create, spend, index,
//! reindex, reopen and audit.

use std::collections::BTreeMap;
use tempfile::{tempdir, TempDir};
use utxo_ledger::core::{Block, Blockchain, ProofOfWork, TXInput, TXOutput, Transaction};
use utxo_ledger::error::{BlockchainError, ErrorKind};
use utxo_ledger::storage::{UTXOSet, UnspentOutputs};
use utxo_ledger::wallet::{hash_pub_key, Wallet, Wallets};
use utxo_ledger::Config;

const TEST_BITS: u32 = 8;

fn test_config(dir: &TempDir) -> Config {
    Config::default()
        .with_data_dir(dir.path())
        .with_target_bits(TEST_BITS)
        .with_subsidy(10)
}

fn balance(utxo_set: &UTXOSet, wallet: &Wallet) -> u64 {
    utxo_set
        .get_balance(&hash_pub_key(wallet.get_public_key()))
        .unwrap()
}

fn send(utxo_set: &UTXOSet, from: &Wallet, to: &Wallet, amount: u64) -> Block {
    let tx = Transaction::new_utxo_transaction(from, &to.get_address(), amount, utxo_set).unwrap();
    let block = utxo_set.get_blockchain().mine_block(&[tx]).unwrap();
    utxo_set.update(&block).unwrap();
    block
}

fn chain_utxo(blockchain: &Blockchain) -> BTreeMap<Vec<u8>, UnspentOutputs> {
    blockchain.find_utxo().unwrap().into_iter().collect()
}

#[test]
fn test_send_scenario() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir);
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &config).unwrap();
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();
    assert_eq!(balance(&utxo_set, &a), 10);

    send(&utxo_set, &a, &b, 4);

    let a_outputs = utxo_set.find_utxo(&hash_pub_key(a.get_public_key())).unwrap();
    let b_outputs = utxo_set.find_utxo(&hash_pub_key(b.get_public_key())).unwrap();
    assert_eq!(a_outputs.iter().map(|o| o.get_value()).sum::<u64>(), 6);
    assert_eq!(b_outputs.iter().map(|o| o.get_value()).sum::<u64>(), 4);

    let blocks: Vec<Block> = utxo_set
        .get_blockchain()
        .iterator()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(blocks.len(), 2);
    assert!(!blocks[0].is_genesis());
    assert!(blocks[1].get_pre_block_hash().is_empty());
    assert_eq!(blocks[0].get_pre_block_hash(), blocks[1].get_hash());

    let pow = ProofOfWork::new(TEST_BITS);
    assert!(blocks.iter().all(|block| pow.validate(block)));
}

#[test]
fn test_fresh_chain_holds_only_genesis_output() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();

    let utxo = blockchain.find_utxo().unwrap();
    assert_eq!(utxo.len(), 1);
    let (txid, record) = utxo.into_iter().next().unwrap();

    let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap().unwrap();
    assert_eq!(txid, genesis.get_transactions()[0].get_id());
    assert_eq!(record.len(), 1);
    assert_eq!(record.outputs()[0].get_output().get_value(), 10);
}

#[test]
fn test_update_matches_reindex() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();
    let c = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    let first = send(&utxo_set, &a, &b, 4);
    let spent_txid = first.get_transactions()[0].get_vin()[0].get_txid().to_vec();
    let new_txid = first.get_transactions()[0].get_id().to_vec();

    let (_, spendable) = utxo_set
        .find_spendable_outputs(&hash_pub_key(a.get_public_key()), 10)
        .unwrap();
    assert!(!spendable.contains_key(&spent_txid));
    assert_eq!(spendable.get(&new_txid), Some(&vec![1]));

    send(&utxo_set, &b, &c, 3);
    send(&utxo_set, &a, &c, 5);

    let incremental = (
        balance(&utxo_set, &a),
        balance(&utxo_set, &b),
        balance(&utxo_set, &c),
        utxo_set.count_transactions().unwrap(),
    );
    assert_eq!(incremental, (1, 1, 8, 2));
    let before = utxo_set.get_records().unwrap();
    assert_eq!(before, chain_utxo(utxo_set.get_blockchain()));

    utxo_set.reindex().unwrap();
    let rebuilt = (
        balance(&utxo_set, &a),
        balance(&utxo_set, &b),
        balance(&utxo_set, &c),
        utxo_set.count_transactions().unwrap(),
    );
    assert_eq!(incremental, rebuilt);
    assert_eq!(before, utxo_set.get_records().unwrap());
}

#[test]
fn test_change_output_keeps_its_index() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    // a keeps change at output 1 of this transaction
    send(&utxo_set, &a, &b, 4);
    // spending b's output 0 leaves only a's change in the record
    send(&utxo_set, &b, &a, 4);
    // spending the change must reference output 1, not 0
    send(&utxo_set, &a, &b, 10);

    assert_eq!(balance(&utxo_set, &a), 0);
    assert_eq!(balance(&utxo_set, &b), 10);
    assert!(utxo_set.get_blockchain().audit().unwrap());
}

fn signed_spend(
    blockchain: &Blockchain,
    from: &Wallet,
    txid: &[u8],
    vout: usize,
    outputs: Vec<TXOutput>,
) -> Transaction {
    let inputs = vec![TXInput::new(txid, vout, from.get_public_key())];
    let mut tx = Transaction::new(inputs, outputs).unwrap();
    blockchain.sign_transaction(&mut tx, from.get_pkcs8()).unwrap();
    tx
}

#[test]
fn test_spent_output_cannot_be_spent_again() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap().unwrap();
    let genesis_txid = genesis.get_transactions()[0].get_id().to_vec();
    let b_hash = hash_pub_key(b.get_public_key());

    let first = signed_spend(&blockchain, &a, &genesis_txid, 0, vec![TXOutput::new_locked(10, &b_hash)]);
    let block = blockchain.mine_block(&[first]).unwrap();
    utxo_set.update(&block).unwrap();
    let tip = blockchain.get_tip_hash();

    // same output again, signature and source are still valid
    let again = signed_spend(&blockchain, &a, &genesis_txid, 0, vec![TXOutput::new_locked(10, &b_hash)]);
    assert!(blockchain.verify_transaction(&again).unwrap());
    let err = blockchain.mine_block(&[again]).unwrap_err();
    assert!(matches!(err, BlockchainError::Transaction(_)));
    assert_eq!(blockchain.get_tip_hash(), tip);

    // the index keeps following the chain
    assert_eq!(balance(&utxo_set, &b), 10);
    send(&utxo_set, &b, &a, 3);
    assert_eq!(balance(&utxo_set, &a), 3);
    assert_eq!(blockchain.find_balance(&b_hash).unwrap(), 7);
}

#[test]
fn test_outputs_may_not_exceed_inputs() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let genesis = blockchain.get_block(&blockchain.get_tip_hash()).unwrap().unwrap();
    let genesis_txid = genesis.get_transactions()[0].get_id().to_vec();
    let b_hash = hash_pub_key(b.get_public_key());

    let inflated = signed_spend(&blockchain, &a, &genesis_txid, 0, vec![TXOutput::new_locked(1000, &b_hash)]);
    assert!(blockchain.verify_transaction(&inflated).unwrap());
    let err = blockchain.mine_block(&[inflated]).unwrap_err();
    assert!(matches!(err, BlockchainError::Transaction(_)));
    assert_eq!(blockchain.get_block_hashes().unwrap().len(), 1);

    // paying out less than consumed is accepted
    let underpaid = signed_spend(&blockchain, &a, &genesis_txid, 0, vec![TXOutput::new_locked(9, &b_hash)]);
    let block = blockchain.mine_block(&[underpaid]).unwrap();
    utxo_set.update(&block).unwrap();
    assert_eq!(balance(&utxo_set, &b), 9);
    assert_eq!(balance(&utxo_set, &a), 0);
}

#[test]
fn test_insufficient_funds_mines_nothing() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();
    let tip = utxo_set.get_blockchain().get_tip_hash();

    let err = Transaction::new_utxo_transaction(&a, &b.get_address(), 11, &utxo_set).unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::InsufficientFunds {
            required: 11,
            available: 10
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(utxo_set.get_blockchain().get_tip_hash(), tip);

    let err = Transaction::new_utxo_transaction(&b, &a.get_address(), 1, &utxo_set).unwrap_err();
    assert!(matches!(err, BlockchainError::InsufficientFunds { available: 0, .. }));
}

#[test]
fn test_create_and_open_errors() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir);
    let a = Wallet::new().unwrap();

    let err = Blockchain::new_blockchain(&config).err().unwrap();
    assert!(matches!(err, BlockchainError::ChainMissing(_)));
    assert_eq!(err.kind(), ErrorKind::Integrity);

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &config).unwrap();
    drop(blockchain);

    let err = Blockchain::create_blockchain(&a.get_address(), &config)
        .err()
        .unwrap();
    assert!(matches!(err, BlockchainError::ChainExists(_)));

    let err = Blockchain::create_blockchain("not-an-address", &test_config(&tempdir().unwrap()))
        .err()
        .unwrap();
    assert!(matches!(err, BlockchainError::InvalidAddress(_)));
}

#[test]
fn test_chain_and_index_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir);
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let tip = {
        let blockchain = Blockchain::create_blockchain(&a.get_address(), &config).unwrap();
        let utxo_set = UTXOSet::new(blockchain);
        utxo_set.reindex().unwrap();
        send(&utxo_set, &a, &b, 7);
        utxo_set.get_blockchain().get_tip_hash()
    };

    let reopened = Blockchain::new_blockchain(&config).unwrap();
    assert_eq!(reopened.get_tip_hash(), tip);
    let utxo_set = UTXOSet::new(reopened);
    assert_eq!(balance(&utxo_set, &a), 3);
    assert_eq!(balance(&utxo_set, &b), 7);
    assert_eq!(utxo_set.get_last_indexed_block().unwrap(), Some(tip));

    send(&utxo_set, &b, &a, 2);
    assert_eq!(balance(&utxo_set, &a), 5);
}

#[test]
fn test_stale_index_is_detected_and_repaired() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();
    let b = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let first = blockchain.mine_block_with_reward(&[], &b.get_address()).unwrap();
    let second = blockchain.mine_block_with_reward(&[], &b.get_address()).unwrap();

    let err = utxo_set.update(&second).unwrap_err();
    assert!(matches!(err, BlockchainError::IndexOutOfOrder { .. }));
    assert_eq!(balance(&utxo_set, &b), 0);

    utxo_set.reindex().unwrap();
    assert_eq!(balance(&utxo_set, &b), 20);

    // both blocks are already covered by the reindex
    utxo_set.update(&second).unwrap();
    assert!(utxo_set.update(&first).is_err());
    assert_eq!(balance(&utxo_set, &b), 20);
}

#[test]
fn test_audit_detects_replaced_block() {
    let temp_dir = tempdir().unwrap();
    let a = Wallet::new().unwrap();

    let blockchain = Blockchain::create_blockchain(&a.get_address(), &test_config(&temp_dir)).unwrap();
    let block = blockchain.mine_block_with_reward(&[], &a.get_address()).unwrap();
    assert!(blockchain.audit().unwrap());

    // a different, validly mined block stored under the tip's key
    let forged_tx = Transaction::new_coinbase_tx(&a.get_address(), "forged", 1000).unwrap();
    let forged = Block::new_block(block.get_pre_block_hash(), &[forged_tx], TEST_BITS).unwrap();
    let blocks_tree = blockchain.get_db().open_tree("blocks").unwrap();
    blocks_tree
        .insert(block.get_hash(), forged.serialize().unwrap())
        .unwrap();

    assert!(!blockchain.audit().unwrap());
}

#[test]
fn test_wallet_file_lives_under_node_dir() {
    let temp_dir = tempdir().unwrap();
    let config = test_config(&temp_dir).with_node_id("3000");

    let mut wallets = Wallets::load(&config.wallet_path()).unwrap();
    let address = wallets.create_wallet().unwrap();

    assert!(config.wallet_path().starts_with(temp_dir.path().join("node_3000")));
    let reloaded = Wallets::load(&config.wallet_path()).unwrap();
    assert_eq!(reloaded.get_addresses(), vec![address]);
}
