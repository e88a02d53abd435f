//! Supervisory observer: mining reports, stepwise transaction verification,
//! chain snapshots and asset histories. Never mutates ledger state.

use std::sync::{Arc, RwLock};

use chrono::Local;

use shared::{pubkey_hash_hex, verify_signature, BlockHeight, Portion};

use crate::block::Block;
use crate::ledger::{AssetTraceEntry, Ledger, POW_TARGET};
use crate::node::{BlockObserver, FullNode};

/// Tip-to-genesis view of one node's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub node_id: String,
    /// (height, short hash) pairs, tip first; empty for an empty chain
    pub entries: Vec<(BlockHeight, String)>,
}

/// The controller's observation surface over the node mesh
pub struct Master {
    ledger: Arc<Ledger>,
    nodes: RwLock<Vec<Arc<FullNode>>>,
}

impl Master {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            nodes: RwLock::new(Vec::new()),
        })
    }

    /// Registers a node for lookup and snapshots
    pub fn register_node(&self, node: Arc<FullNode>) {
        self.nodes.write().unwrap().push(node);
    }

    #[must_use]
    pub fn find_node(&self, node_id: &str) -> Option<Arc<FullNode>> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .find(|node| node.node_id() == node_id)
            .cloned()
    }

    /// Narrated stepwise verification of the first transaction of either the
    /// node's last-mined block (`from_last_block`) or the current tip.
    ///
    /// The returned lines are the observable contract: outpoint existence,
    /// asset-id consistency, pubkey-hash binding, signature, then portion
    /// conservation, aborting at the first failing check.
    #[must_use]
    pub fn verify_transaction(&self, node_id: &str, from_last_block: bool) -> Vec<String> {
        let mut lines = Vec::new();

        let node = match self.find_node(node_id) {
            Some(node) => node,
            None => {
                lines.push(format!("no such node {node_id}"));
                return lines;
            }
        };
        let block = if from_last_block {
            node.last_mined_block()
        } else {
            self.ledger.tip_block()
        };
        let tx = match block.as_ref().and_then(|block| block.txs.first()) {
            Some(tx) => tx.clone(),
            None => {
                lines.push(format!("node {node_id} has no mined block / no txs"));
                return lines;
            }
        };

        lines.push(format!("{node_id} Merkle-tree leftmost txID: {}", tx.txid));

        let mut asset_id: Option<String> = None;
        let mut total_in: Portion = 0;
        for (idx, input) in tx.inputs.iter().enumerate() {
            lines.push(format!(
                "  input#{idx}: outpoint = ({}, {})",
                input.txid_ref, input.index
            ));

            let utxo = match self.ledger.find_output_in_chain(&input.txid_ref, input.index) {
                Some(output) => output,
                None => {
                    lines.push(
                        "    check - outpoint ... NO! (output not found in chain)".to_string(),
                    );
                    return lines;
                }
            };
            lines.push(format!(
                "    outpoint: <asset={}>, <pubKHash={}...>, <portion={}>",
                utxo.asset_id,
                &utxo.pubkey_hash[..8],
                utxo.portion
            ));

            match &asset_id {
                None => asset_id = Some(utxo.asset_id.clone()),
                Some(id) if *id != utxo.asset_id => {
                    lines.push("    check - same assetId ... NO! (mixed assets)".to_string());
                    return lines;
                }
                Some(_) => {}
            }
            total_in += utxo.portion;

            let bound = pubkey_hash_hex(&input.pubkey)
                .is_some_and(|hash| hash == utxo.pubkey_hash);
            lines.push(format!(
                "    check - <pubK> vs <pubKHash> ... {}",
                if bound { "yes!" } else { "NO!" }
            ));

            let signed = tx
                .message_hash()
                .map(|msg| verify_signature(&input.pubkey, &msg, &input.signature))
                .unwrap_or(false);
            lines.push(format!(
                "    check - <pubK> <sig> txid ... {}",
                if signed { "yes!" } else { "NO!" }
            ));
            if !signed {
                return lines;
            }
        }

        let mut total_out: Portion = 0;
        for output in &tx.outputs {
            if asset_id.as_deref() != Some(output.asset_id.as_str()) {
                lines.push(
                    "  check - all outputs assetId equal input assetId ... NO!".to_string(),
                );
                return lines;
            }
            total_out += output.portion;
        }

        let conserved = total_in == total_out;
        lines.push(format!(
            "  check - sum(in portion) == sum(out portion) ... {} (in={total_in}, out={total_out})",
            if conserved { "yes!" } else { "NO!" }
        ));
        if conserved {
            lines.push("  all checks passed: yes!".to_string());
        }
        lines
    }

    /// Tip-to-genesis snapshot for one node or for every registered node.
    /// An unknown target yields no snapshots.
    #[must_use]
    pub fn snapshot_chains(&self, target: Option<&str>) -> Vec<ChainSnapshot> {
        let nodes: Vec<Arc<FullNode>> = match target {
            Some(node_id) => self.find_node(node_id).into_iter().collect(),
            None => self.nodes.read().unwrap().clone(),
        };

        nodes
            .iter()
            .map(|node| {
                let entries = node
                    .ledger()
                    .build_chain_from_tip()
                    .into_iter()
                    .map(|(hash, block)| {
                        (block.header.height, hash.to_string()[..8].to_string())
                    })
                    .collect();
                ChainSnapshot {
                    node_id: node.node_id().to_string(),
                    entries,
                }
            })
            .collect()
    }

    /// Asset history from the ledger, newest first, truncated to `limit`
    /// entries when set
    #[must_use]
    pub fn trace_asset(&self, asset_id: &str, limit: Option<usize>) -> Vec<AssetTraceEntry> {
        let mut history = self.ledger.trace_asset(asset_id);
        if let Some(limit) = limit {
            history.truncate(limit);
        }
        history
    }
}

impl BlockObserver for Master {
    /// Reports the mined block with its arrival wall-clock time, then
    /// narrates verification of the leftmost transaction
    fn on_block_mined(&self, node: &FullNode, block: &Block) {
        let now = Local::now().format("%H:%M:%S");
        let header = &block.header;
        let hash = match block.hash() {
            Ok(hash) => hash,
            Err(_) => return,
        };

        println!(
            "[master] a block with blockHeight {} mined by {} (report arrived at {now})",
            header.height,
            node.node_id()
        );
        println!(
            "         headerHash={hash}, target={POW_TARGET}, ok={}",
            hash.below_target(&POW_TARGET)
        );

        if !block.txs.is_empty() {
            println!("         verifying leftmost tx in Merkle-tree:");
            for line in self.verify_transaction(node.node_id(), true) {
                println!("{line}");
            }
        }
    }
}
