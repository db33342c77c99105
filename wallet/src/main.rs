//! Command-line host for the wallet engine
//!
//! Usage:
//! ```bash
//! cd wallet
//! BITCOIN_NETWORK=regtest cargo run -- info
//! cargo run -- send bcrt1q... 25000 2
//! ```
use std::env;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use bitcoin::Txid;
use wallet_engine::{
    FileWalletFactory, Manager, ManagerConfig, MempoolTx, Recipient, Wallet, WalletConfig,
};

const USAGE: &str = "\
Usage: wallet-node <command> [args]

Commands:
  info                              Network, tip, receive address and balance
  address                           Lowest unused receive address
  fresh-address                     Receive address never handed out before
  balance                           Balance buckets
  utxos                             Unspent outputs
  transactions                      Wallet transactions
  mempool <raw-tx-hex>...           Feed unconfirmed transactions
  send <address> <sats> [sat/vB]    Build and sign a payment (not broadcast)
  cancel <txid>                     Forget an unconfirmed transaction
  mnemonic                          Print the recovery phrase";

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    let config = WalletConfig::from_env();
    let manager = Manager::new(
        ManagerConfig {
            wallet: config,
            factory: Some(Arc::new(FileWalletFactory)),
        },
        None,
    )?;
    let wallet = manager.wallet();

    match command.as_str() {
        "info" => {
            let tip = wallet.tip()?;
            let address = wallet.unused_address()?;
            let balance = wallet.balance()?;
            println!("\n📊 Wallet ({})\n", wallet.network());
            println!("  Tip:       {} @ {}", tip.hash, tip.height);
            println!("  Receive:   {} (index {})", address.address, address.index);
            println!("  Spendable: {} sats", balance.trusted_spendable().to_sat());
            println!("  Total:     {} sats\n", balance.total().to_sat());
            for block in wallet.recent_blocks(5)? {
                println!("  #{:<8} {}", block.height, block.hash);
            }
        }
        "address" => {
            let info = wallet.unused_address()?;
            println!("{}", info.address);
        }
        "fresh-address" => {
            let info = wallet.fresh_address()?;
            println!("{}", info.address);
        }
        "balance" => {
            let balance = wallet.balance()?;
            println!("confirmed:         {}", balance.confirmed.to_sat());
            println!("trusted_pending:   {}", balance.trusted_pending.to_sat());
            println!("untrusted_pending: {}", balance.untrusted_pending.to_sat());
            println!("immature:          {}", balance.immature.to_sat());
        }
        "utxos" => {
            for utxo in wallet.utxos()? {
                println!(
                    "{}:{}  {} sats  {} conf{}",
                    utxo.txid,
                    utxo.vout,
                    utxo.amount.to_sat(),
                    utxo.confirmations,
                    if utxo.is_change { "  (change)" } else { "" }
                );
            }
        }
        "transactions" => {
            for tx in wallet.transactions()? {
                println!(
                    "{}  +{} -{}  {} conf",
                    tx.txid,
                    tx.received.to_sat(),
                    tx.spent.to_sat(),
                    tx.confirmations
                );
            }
        }
        "mempool" => {
            if args.len() < 2 {
                bail!("mempool needs at least one raw transaction");
            }
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let txs = args[1..]
                .iter()
                .map(|raw| MempoolTx::from_hex(raw, now))
                .collect::<Result<Vec<_>, _>>()?;
            manager.notify_new_transactions(txs);
        }
        "send" => {
            if args.len() < 3 {
                bail!("send needs an address and an amount");
            }
            let amount: u64 = args[2].parse().context("amount must be in satoshis")?;
            let fee_rate: u64 = match args.get(3) {
                Some(rate) => rate.parse().context("fee rate must be sat/vB")?,
                None => 1,
            };
            let raw = wallet.create_tx(fee_rate, &[Recipient::new(args[1].clone(), amount)])?;
            println!("{}", hex::encode(raw));
        }
        "cancel" => {
            let Some(txid) = args.get(1) else {
                bail!("cancel needs a txid");
            };
            let txid = Txid::from_str(txid).context("invalid txid")?;
            wallet.cancel_tx(&txid)?;
            println!("✅ Cancelled {}", txid);
        }
        "mnemonic" => {
            println!("{}", wallet.mnemonic_words().join(" "));
        }
        other => {
            eprintln!("❌ Unknown command '{}'\n\n{}", other, USAGE);
            std::process::exit(1);
        }
    }

    Ok(())
}
