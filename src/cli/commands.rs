use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "utxo-ledger")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(
        name = "send",
        about = "Send coins between addresses and mine the transaction into a new block"
    )]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(
            long = "reward",
            value_name = "ADDRESS",
            help = "Add a coinbase paying the block subsidy to ADDRESS"
        )]
        reward: Option<String>,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(
        name = "audit",
        about = "Re-check proof-of-work and hash links of every block"
    )]
    Audit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_with_reward() {
        let opt = Opt::try_parse_from(["utxo-ledger", "send", "from", "to", "4", "--reward", "miner"])
            .unwrap();
        match opt.command {
            Command::Send {
                from,
                to,
                amount,
                reward,
            } => {
                assert_eq!((from.as_str(), to.as_str(), amount), ("from", "to", 4));
                assert_eq!(reward.as_deref(), Some("miner"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        assert!(Opt::try_parse_from(["utxo-ledger", "send", "a", "b", "-3"]).is_err());
    }
}
