//! Background transaction traffic: valid spends of random UTXOs plus a
//! configurable ratio of deliberately corrupted ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use shared::{Portion, Result, Wallet};

use crate::ledger::Ledger;
use crate::node::FullNode;
use crate::transaction::{Transaction, TxInput, TxOutput};

/// Cadence and corruption settings for the traffic producer
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Delay between submissions
    pub interval: Duration,
    /// Probability that a submission is deliberately corrupted
    pub invalid_ratio: f64,
    /// Seed for the producer's random stream
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            invalid_ratio: 0.2,
            seed: 0,
        }
    }
}

/// Builds a valid spend of one randomly chosen UTXO.
///
/// The outpoint's portion is split across up to three positive shares
/// assigned to randomly chosen wallets; the owning wallet signs the
/// signing-form hash. Returns `None` when the UTXO set is empty or no known
/// wallet owns the chosen outpoint.
///
/// # Errors
///
/// Returns an error if a canonical form fails to serialize
pub fn random_valid_transaction(
    ledger: &Ledger,
    wallets: &[Arc<Wallet>],
    rng: &mut StdRng,
) -> Result<Option<Transaction>> {
    let utxos = ledger.utxo_snapshot();
    let (outpoint, utxo) = match utxos.choose(rng) {
        Some(entry) => entry,
        None => return Ok(None),
    };

    // split the portion into k positive shares summing to the total;
    // k is clamped so every share can stay positive
    let k: Portion = rng.gen_range(1..=3);
    let k = k.min(utxo.portion);
    let mut remaining = utxo.portion;
    let mut outputs = Vec::with_capacity(k as usize);
    for i in 0..k {
        let recipient = match wallets.choose(rng) {
            Some(wallet) => wallet,
            None => return Ok(None),
        };
        let share = if i == k - 1 {
            remaining
        } else {
            rng.gen_range(1..=remaining - (k - i - 1))
        };
        remaining -= share;
        outputs.push(TxOutput::new(
            utxo.asset_id.clone(),
            recipient.pubkey_hash(),
            share,
        ));
    }

    let owner = match wallets
        .iter()
        .find(|wallet| wallet.pubkey_hash() == utxo.pubkey_hash)
    {
        Some(wallet) => wallet,
        None => return Ok(None),
    };

    let placeholder = TxInput::new(outpoint.txid, outpoint.index, owner.pubkey_hex(), String::new());
    let mut tx = Transaction::new(vec![placeholder], outputs)?;
    let signature = owner.sign(&tx.message_hash()?);
    tx.inputs[0].signature = signature;
    tx.recompute_txid()?;
    Ok(Some(tx))
}

/// Builds a valid spend, deep-copies it, then injects exactly one defect:
/// a portion bump, a sentinel asset id, a foreign claimant key, or a
/// foreign re-signature. The txid is recomputed after the mutation.
///
/// # Errors
///
/// Returns an error if a canonical form fails to serialize
pub fn random_invalid_transaction(
    ledger: &Ledger,
    wallets: &[Arc<Wallet>],
    rng: &mut StdRng,
) -> Result<Option<Transaction>> {
    let mut tx = match random_valid_transaction(ledger, wallets, rng)? {
        Some(tx) => tx,
        None => return Ok(None),
    };

    let foreign: Vec<&Arc<Wallet>> = wallets
        .iter()
        .filter(|wallet| wallet.pubkey_hex() != tx.inputs[0].pubkey)
        .collect();

    match rng.gen_range(0..4) {
        0 => tx.outputs[0].portion += 1,
        1 => tx.outputs[0].asset_id = "broken-asset".to_string(),
        2 => match foreign.choose(rng) {
            Some(wallet) => tx.inputs[0].pubkey = wallet.pubkey_hex(),
            // a single-wallet universe has no foreign key to borrow
            None => tx.outputs[0].portion += 1,
        },
        _ => match foreign.choose(rng) {
            Some(wallet) => {
                let msg_hash = tx.message_hash()?;
                tx.inputs[0].signature = wallet.sign(&msg_hash);
            }
            None => tx.outputs[0].portion += 1,
        },
    }
    tx.recompute_txid()?;
    Ok(Some(tx))
}

/// Background producer submitting transactions to random nodes at a fixed
/// cadence.
///
/// The cooperative stop flag is observed once per cycle; dropping the
/// handle stops and joins the thread.
pub struct UserProcess {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UserProcess {
    /// Spawns the producer thread
    #[must_use]
    pub fn start(
        nodes: Vec<Arc<FullNode>>,
        ledger: Arc<Ledger>,
        wallets: Vec<Arc<Wallet>>,
        config: TrafficConfig,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(config.seed);
            info!("user process started");
            while flag.load(Ordering::SeqCst) {
                if let Some(node) = nodes.choose(&mut rng) {
                    let built = if rng.gen_bool(config.invalid_ratio) {
                        random_invalid_transaction(&ledger, &wallets, &mut rng)
                    } else {
                        random_valid_transaction(&ledger, &wallets, &mut rng)
                    };
                    match built {
                        Ok(Some(tx)) => {
                            debug!(txid = %tx.txid, node = %node.node_id(), "submitting tx");
                            node.receive_transaction(&tx);
                        }
                        Ok(None) => {}
                        Err(error) => debug!(%error, "skipping unbuildable tx"),
                    }
                }
                thread::sleep(config.interval);
            }
            info!("user process stopped");
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Whether the producer has not been told to stop yet
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the producer to stop after its current cycle
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stops the producer and joins its thread
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UserProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn world(num_assets: usize, num_wallets: usize) -> (Arc<Ledger>, Vec<Arc<Wallet>>) {
        let mut rng = StdRng::seed_from_u64(0);
        let wallets: Vec<Arc<Wallet>> = (0..num_wallets)
            .map(|_| Arc::new(Wallet::generate(&mut rng)))
            .collect();
        let ledger = Arc::new(Ledger::new());
        ledger
            .add_genesis_block(Block::genesis(num_assets, &wallets).unwrap())
            .unwrap();
        (ledger, wallets)
    }

    #[test]
    fn test_valid_transactions_validate() {
        let (ledger, wallets) = world(2, 4);
        let mut rng = StdRng::seed_from_u64(0);

        for _ in 0..20 {
            let tx = random_valid_transaction(&ledger, &wallets, &mut rng)
                .unwrap()
                .expect("genesis UTXOs exist");
            assert!(ledger.validate_transaction(&tx).is_ok());
            assert_eq!(tx.total_output_portion(), 100);
            assert!(tx.outputs.iter().all(|output| output.portion >= 1));
            assert!((1..=3).contains(&tx.outputs.len()));
        }
    }

    #[test]
    fn test_invalid_transactions_are_rejected() {
        let (ledger, wallets) = world(2, 4);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let tx = random_invalid_transaction(&ledger, &wallets, &mut rng)
                .unwrap()
                .expect("genesis UTXOs exist");
            assert!(ledger.validate_transaction(&tx).is_err());
        }
    }

    #[test]
    fn test_empty_utxo_set_produces_nothing() {
        let ledger = Ledger::new();
        let mut rng = StdRng::seed_from_u64(0);

        let built = random_valid_transaction(&ledger, &[], &mut rng).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_unknown_owner_produces_nothing() {
        let (ledger, _) = world(1, 2);
        let mut rng = StdRng::seed_from_u64(0);

        // a wallet set that does not contain the genesis owner
        let mut other_rng = StdRng::seed_from_u64(99);
        let strangers: Vec<Arc<Wallet>> = (0..2)
            .map(|_| Arc::new(Wallet::generate(&mut other_rng)))
            .collect();

        let built = random_valid_transaction(&ledger, &strangers, &mut rng).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_user_process_submits_and_stops() {
        let (ledger, wallets) = world(2, 4);
        let node = FullNode::new("F0", Arc::clone(&ledger), None);

        let mut process = UserProcess::start(
            vec![Arc::clone(&node)],
            Arc::clone(&ledger),
            wallets,
            TrafficConfig {
                interval: Duration::from_millis(5),
                invalid_ratio: 0.0,
                seed: 0,
            },
        );

        // give the producer a few cycles
        thread::sleep(Duration::from_millis(100));
        assert!(process.is_running());
        process.shutdown();
        assert!(!process.is_running());

        assert!(node.mempool_len() >= 1);
    }
}
