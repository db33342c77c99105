/// Transaction building: fees, change, signing and cancellation
mod common;

use bitcoin::consensus::encode::deserialize;
use bitcoin::{Amount, Network, Transaction};
use common::*;
use wallet_engine::{BitcoinWallet, Keychain, MempoolTx, Recipient, Wallet, WalletError};

/// Wallet with a single 100k output confirmed at height 100, tip at 110
fn wallet_at_110() -> BitcoinWallet {
    let wallet = memory_wallet(test_config(std::env::temp_dir().as_path()));
    let addr = wallet.peek_address(0).unwrap().address;

    let mut chain = TestChain::starting_at(100);
    chain.mine(vec![funding_tx(1, &addr, 100_000)]);
    chain.mine_to(110);
    for (block, height) in &chain.blocks {
        wallet.apply_block(block, *height).unwrap();
    }
    wallet
}

fn pay(sats: u64) -> Recipient {
    Recipient::new(foreign_address().to_string(), sats)
}

#[test]
fn test_create_tx_fee_and_change() {
    init_logging();
    let wallet = wallet_at_110();

    let raw = wallet.create_tx(1, &[pay(50_000)]).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();

    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value, Amount::from_sat(50_000));
    assert_eq!(tx.output[0].script_pubkey, foreign_address().script_pubkey());
    assert_eq!(tx.output[1].value, Amount::from_sat(49_859));

    assert!(wallet.is_used(Keychain::Internal, 0).unwrap());

    // Signed P2WPKH: signature and pubkey
    assert_eq!(tx.input[0].witness.len(), 2);
    assert!(tx.input[0].script_sig.is_empty());

    let balance = wallet.balance().unwrap();
    assert_eq!(balance.confirmed, Amount::ZERO);
    assert_eq!(balance.trusted_pending, Amount::from_sat(49_859));
    assert_eq!(balance.total(), wallet.unspent_total().unwrap());

    let record = wallet
        .transactions()
        .unwrap()
        .into_iter()
        .find(|t| t.txid == tx.compute_txid())
        .unwrap();
    assert_eq!(record.spent, Amount::from_sat(100_000));
    assert_eq!(record.received, Amount::from_sat(49_859));
    assert_eq!(record.confirmations, 0);
}

#[test]
fn test_created_tx_confirms_in_block() {
    init_logging();
    let wallet = memory_wallet(test_config(std::env::temp_dir().as_path()));
    let addr = wallet.peek_address(0).unwrap().address;

    let mut chain = TestChain::starting_at(100);
    let (block, height) = chain.mine(vec![funding_tx(1, &addr, 100_000)]);
    wallet.apply_block(&block, height).unwrap();

    let raw = wallet.create_tx(2, &[pay(30_000)]).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();

    let (block, height) = chain.mine(vec![tx]);
    wallet.apply_block(&block, height).unwrap();

    let balance = wallet.balance().unwrap();
    assert_eq!(balance.trusted_pending, Amount::ZERO);
    assert_eq!(balance.confirmed, wallet.unspent_total().unwrap());
    assert!(balance.confirmed < Amount::from_sat(70_000));
}

#[test]
fn test_insufficient_funds_leaves_wallet_unchanged() {
    init_logging();
    let wallet = wallet_at_110();
    let utxos = wallet.utxos().unwrap();
    let balance = wallet.balance().unwrap();

    let err = wallet.create_tx(1, &[pay(200_000)]).unwrap_err();
    match err {
        WalletError::InsufficientFunds { needed, available } => {
            assert!(needed > 200_000);
            assert_eq!(available, 100_000);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(wallet.utxos().unwrap(), utxos);
    assert_eq!(wallet.balance().unwrap(), balance);
    assert!(!wallet.is_used(Keychain::Internal, 0).unwrap());
}

#[test]
fn test_spending_whole_balance_drops_dust_change() {
    init_logging();
    let wallet = wallet_at_110();

    // 100_000 - 110 fee leaves nothing worth a change output
    let raw = wallet.create_tx(1, &[pay(99_700)]).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();

    assert_eq!(tx.output.len(), 1);
    assert_eq!(wallet.balance().unwrap().total(), Amount::ZERO);
    assert!(!wallet.is_used(Keychain::Internal, 0).unwrap());
}

#[test]
fn test_create_tx_usage_errors() {
    init_logging();
    let wallet = wallet_at_110();

    assert!(matches!(
        wallet.create_tx(1, &[]),
        Err(WalletError::NoRecipient)
    ));
    assert!(matches!(
        wallet.create_tx(1, &[Recipient::new("not-an-address", 1_000)]),
        Err(WalletError::InvalidAddress(_))
    ));
    assert!(matches!(
        wallet.create_tx(1, &[Recipient::new("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu", 1_000)]),
        Err(WalletError::InvalidAddress(_))
    ));
    assert!(matches!(
        wallet.create_tx(1, &[pay(0)]),
        Err(WalletError::InvalidAmount(_))
    ));

    let err = wallet.create_tx(1, &[]).unwrap_err();
    assert!(err.is_usage());
    assert_eq!(err.to_string(), "Must have at least one recipient");
    assert_eq!(wallet.balance().unwrap().confirmed, Amount::from_sat(100_000));
}

#[test]
fn test_cancel_tx_releases_inputs() {
    init_logging();
    let wallet = wallet_at_110();

    let raw = wallet.create_tx(1, &[pay(50_000)]).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();
    let txid = tx.compute_txid();

    wallet.cancel_tx(&txid).unwrap();
    let balance = wallet.balance().unwrap();
    assert_eq!(balance.confirmed, Amount::from_sat(100_000));
    assert_eq!(balance.trusted_pending, Amount::ZERO);

    assert!(matches!(
        wallet.cancel_tx(&txid),
        Err(WalletError::TransactionNotFound(_))
    ));

    let funding = wallet.utxos().unwrap()[0].txid;
    assert!(matches!(
        wallet.cancel_tx(&funding),
        Err(WalletError::AlreadyConfirmed(_))
    ));
}

#[test]
fn test_unconfirmed_change_is_spendable() {
    init_logging();
    let wallet = wallet_at_110();

    wallet.create_tx(1, &[pay(50_000)]).unwrap();
    let raw = wallet.create_tx(1, &[pay(40_000)]).unwrap();
    let tx: Transaction = deserialize(&raw).unwrap();

    let change = wallet.utxos().unwrap();
    assert_eq!(change.len(), 1);
    assert!(change[0].is_change);
    assert_eq!(change[0].derivation_index, 1);
    assert_eq!(tx.input.len(), 1);
}

#[test]
fn test_unconfirmed_receive_is_not_spendable() {
    init_logging();
    let wallet = memory_wallet(test_config(std::env::temp_dir().as_path()));
    let addr = wallet.peek_address(0).unwrap().address;

    wallet
        .apply_mempool_transactions(vec![MempoolTx::new(funding_tx(1, &addr, 100_000), 1)])
        .unwrap();

    assert_eq!(
        wallet.balance().unwrap().untrusted_pending,
        Amount::from_sat(100_000)
    );
    assert!(matches!(
        wallet.create_tx(1, &[pay(10_000)]),
        Err(WalletError::InsufficientFunds { .. })
    ));
}

#[test]
fn test_peek_is_stable_and_side_effect_free() {
    init_logging();
    let wallet = memory_wallet(test_config(std::env::temp_dir().as_path()));

    let peeked = wallet.peek_address(3).unwrap();
    assert_eq!(wallet.peek_address(3).unwrap(), peeked);
    assert_eq!(wallet.unused_address().unwrap().index, 0);
    assert_eq!(wallet.unused_address().unwrap().index, 0);

    assert_eq!(wallet.fresh_address().unwrap().index, 1);
    assert_eq!(wallet.fresh_address().unwrap().index, 2);
    assert_eq!(wallet.unused_address().unwrap().index, 0);
    assert_eq!(wallet.network(), Network::Regtest);
}

#[test]
fn test_oversized_amounts_are_rejected_without_breaking_wallet() {
    init_logging();
    let wallet = wallet_at_110();
    let balance = wallet.balance().unwrap();

    assert!(matches!(
        wallet.create_tx(1, &[pay(u64::MAX - 10)]),
        Err(WalletError::InvalidAmount(_))
    ));

    // Each amount is fine on its own; the sum exceeds the money supply
    let half = Amount::MAX_MONEY.to_sat() / 2 + 1;
    assert!(matches!(
        wallet.create_tx(1, &[pay(half), pay(half)]),
        Err(WalletError::InvalidAmount(_))
    ));

    assert!(matches!(
        wallet.create_tx(1, &[pay(Amount::MAX_MONEY.to_sat())]),
        Err(WalletError::InsufficientFunds { .. })
    ));

    assert_eq!(wallet.balance().unwrap(), balance);
    assert!(wallet.create_tx(1, &[pay(50_000)]).is_ok());
}
