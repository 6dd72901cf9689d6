// Entry point for the ledger CLI. All state lives under the directory the
// global config resolves (BLOCKCHAIN_DATA_DIR / NODE_ID).
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, info, LevelFilter};
use std::process;
use utxo_ledger::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Blockchain,
    Command, Opt, ProofOfWork, Transaction, UTXOSet, Wallets, GLOBAL_CONFIG,
};

fn main() {
    // Info by default; RUST_LOG still wins
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let config = &*GLOBAL_CONFIG;
    config.validate()?;

    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = Blockchain::create_blockchain(&address, config)?;
            // a fresh chain needs its index built once before anything can be spent
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let utxo_set = UTXOSet::new(Blockchain::new_blockchain(config)?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            reward,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::load(&config.wallet_path())?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for address {from}"))?;

            let blockchain = Blockchain::new_blockchain(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone());

            // funds are checked here, before anything gets mined
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            let block = match reward {
                Some(miner) => {
                    if !validate_address(&miner) {
                        return Err(format!("Invalid reward address: {miner}").into());
                    }
                    blockchain.mine_block_with_reward(&[transaction], &miner)?
                }
                None => blockchain.mine_block(&[transaction])?,
            };
            utxo_set.update(&block)?;
            info!("Transaction mined in block {}", HEXLOWER.encode(block.get_hash()));
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::new_blockchain(config)?;
            let pow = ProofOfWork::new(blockchain.get_target_bits());

            for block in blockchain.iterator() {
                let block = block?;
                println!("Pre block hash: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("Cur block hash: {}", HEXLOWER.encode(block.get_hash()));
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!("PoW: {}", pow.validate(&block));

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", HEXLOWER.encode(tx.get_id()));

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                                convert_address(pub_key_hash.as_slice()),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            convert_address(output.get_pub_key_hash()),
                        )
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(Blockchain::new_blockchain(config)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::Audit => {
            let blockchain = Blockchain::new_blockchain(config)?;
            if !blockchain.audit()? {
                return Err("Chain audit failed".into());
            }
            let blocks = blockchain.get_block_hashes()?.len();
            println!(
                "Chain at {} OK: {blocks} blocks verified.",
                blockchain.get_db_path().display()
            );
        }
    }
    Ok(())
}
