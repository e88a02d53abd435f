//! Line-oriented controller shell.
//!
//! Whitespace-tokenised commands drive the whole system: ledger and node
//! initialization, the background traffic process, mining triggers and the
//! master's supervisory views. The loop reads from any `BufRead` and writes
//! to any `Write`, so the whole surface is testable without a terminal.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dachain_core::{
    Block, BlockObserver, ChainStore, FullNode, Ledger, Master, MemoryStore, TrafficConfig,
    UserProcess, WalletRecord,
};
use shared::Wallet;

pub struct Shell {
    rng: StdRng,
    interval: Duration,
    invalid_ratio: f64,
    ledger: Option<Arc<Ledger>>,
    wallets: Vec<Arc<Wallet>>,
    nodes: Vec<Arc<FullNode>>,
    master: Option<Arc<Master>>,
    user_proc: Option<UserProcess>,
}

impl Shell {
    #[must_use]
    pub fn new(seed: u64, interval: Duration, invalid_ratio: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interval,
            invalid_ratio,
            ledger: None,
            wallets: Vec::new(),
            nodes: Vec::new(),
            master: None,
            user_proc: None,
        }
    }

    /// Runs the command loop until `exit` or end of input
    ///
    /// # Errors
    ///
    /// Returns an error when reading or writing fails
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> io::Result<()> {
        print_help(out)?;
        for line in input.lines() {
            let line = line?;
            if !self.dispatch(&line, out)? {
                break;
            }
        }
        if let Some(mut user_proc) = self.user_proc.take() {
            user_proc.shutdown();
        }
        Ok(())
    }

    /// Handles one command line; returns false when the shell should exit
    fn dispatch<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<bool> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["exit"] => {
                if let Some(mut user_proc) = self.user_proc.take() {
                    user_proc.shutdown();
                    writeln!(out, "[userProcess] stopped")?;
                }
                return Ok(false);
            }
            ["initiate", "daChain", n] => match n.parse::<usize>() {
                Ok(n) => self.initiate_dachain(n, out)?,
                Err(_) => writeln!(out, "N must be an integer")?,
            },
            ["initiate", "fullNodes", l] => match l.parse::<usize>() {
                Ok(l) => self.initiate_fullnodes(l, out)?,
                Err(_) => writeln!(out, "L must be an integer")?,
            },
            ["run", "userProcess"] => self.run_userprocess(out)?,
            ["stop", "userProcess"] => self.stop_userprocess(out)?,
            ["mine", node_id] => self.mine(node_id, out)?,
            ["verify-transaction", node_id] => self.verify_transaction(node_id, out)?,
            ["snapshot", "daChain", target] => self.snapshot_dachain(target, out)?,
            ["trace", asset_id] => self.trace_asset(asset_id, "ALL", out)?,
            ["trace", asset_id, limit] => self.trace_asset(asset_id, limit, out)?,
            _ => writeln!(out, "unknown command")?,
        }
        Ok(true)
    }

    /// Builds the ledger: N assets, 2N wallets, the first N as genesis owners
    fn initiate_dachain<W: Write>(&mut self, n: usize, out: &mut W) -> io::Result<()> {
        if self.ledger.is_some() {
            writeln!(out, "daChain is already initialized")?;
            return Ok(());
        }

        let store: Arc<dyn ChainStore> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::with_store(Arc::clone(&store)));

        self.wallets = (0..2 * n)
            .map(|_| Arc::new(Wallet::generate(&mut self.rng)))
            .collect();
        for (i, wallet) in self.wallets.iter().enumerate() {
            let record = WalletRecord {
                name: format!("wallet-{i}"),
                privkey: wallet.secret_hex(),
                pubkey: wallet.pubkey_hex(),
                pubkey_hash: wallet.pubkey_hash(),
            };
            if let Err(error) = store.insert_wallet(&record) {
                writeln!(out, "failed to persist wallet: {error}")?;
                return Ok(());
            }
        }

        let genesis = match Block::genesis(n, &self.wallets) {
            Ok(block) => block,
            Err(error) => {
                writeln!(out, "failed to build genesis: {error}")?;
                return Ok(());
            }
        };
        if let Err(error) = ledger.add_genesis_block(genesis) {
            writeln!(out, "failed to install genesis: {error}")?;
            return Ok(());
        }

        self.ledger = Some(ledger);
        writeln!(out, "[genesis] created with {n} assets")?;
        writeln!(
            out,
            "created {} wallets ({n} genesis owners, {n} extra participants)",
            2 * n
        )?;
        Ok(())
    }

    /// Builds L nodes bound to the ledger, fully meshed
    fn initiate_fullnodes<W: Write>(&mut self, l: usize, out: &mut W) -> io::Result<()> {
        let Some(ledger) = self.ledger.clone() else {
            writeln!(out, "run `initiate daChain N` first")?;
            return Ok(());
        };
        if !self.nodes.is_empty() {
            writeln!(out, "fullNodes are already initialized")?;
            return Ok(());
        }

        let master = Master::new(Arc::clone(&ledger));
        self.nodes = (0..l)
            .map(|i| {
                let node = FullNode::new(
                    format!("F{i}"),
                    Arc::clone(&ledger),
                    Some(Arc::clone(&master) as Arc<dyn BlockObserver>),
                );
                master.register_node(Arc::clone(&node));
                node
            })
            .collect();
        for a in &self.nodes {
            for b in &self.nodes {
                a.connect_peer(Arc::clone(b));
            }
        }
        self.master = Some(master);

        writeln!(out, "{l} full nodes created and fully meshed")?;
        Ok(())
    }

    fn run_userprocess<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let Some(ledger) = self.ledger.clone() else {
            writeln!(out, "initialize daChain and fullNodes first")?;
            return Ok(());
        };
        if self.nodes.is_empty() || self.wallets.is_empty() {
            writeln!(out, "initialize daChain and fullNodes first")?;
            return Ok(());
        }
        if self.user_proc.as_ref().is_some_and(UserProcess::is_running) {
            writeln!(out, "userProcess is already running")?;
            return Ok(());
        }

        let config = TrafficConfig {
            interval: self.interval,
            invalid_ratio: self.invalid_ratio,
            seed: self.rng.gen(),
        };
        self.user_proc = Some(UserProcess::start(
            self.nodes.clone(),
            ledger,
            self.wallets.clone(),
            config,
        ));
        writeln!(out, "[userProcess] started")?;
        Ok(())
    }

    fn stop_userprocess<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        match self.user_proc.take() {
            Some(mut user_proc) if user_proc.is_running() => {
                user_proc.shutdown();
                writeln!(out, "[userProcess] stopped")?;
            }
            _ => writeln!(out, "userProcess is not running")?,
        }
        Ok(())
    }

    fn mine<W: Write>(&mut self, node_id: &str, out: &mut W) -> io::Result<()> {
        let node = self.nodes.iter().find(|node| node.node_id() == node_id);
        let Some(node) = node else {
            writeln!(out, "no such node {node_id}")?;
            return Ok(());
        };

        match node.mine() {
            Ok(block) => writeln!(
                out,
                "[{node_id}] mined block height={} hash={}",
                block.header.height,
                block.hash().map(|h| h.to_string()).unwrap_or_default()
            )?,
            Err(error) => writeln!(out, "[{node_id}] mining failed: {error}")?,
        }
        Ok(())
    }

    fn verify_transaction<W: Write>(&mut self, node_id: &str, out: &mut W) -> io::Result<()> {
        let Some(master) = &self.master else {
            writeln!(out, "no master process yet; run `initiate fullNodes L` first")?;
            return Ok(());
        };
        for line in master.verify_transaction(node_id, false) {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn snapshot_dachain<W: Write>(&mut self, target: &str, out: &mut W) -> io::Result<()> {
        let Some(master) = &self.master else {
            writeln!(out, "no master process yet; run `initiate fullNodes L` first")?;
            return Ok(());
        };

        let filter = (target != "ALL").then_some(target);
        let snapshots = master.snapshot_chains(filter);
        if snapshots.is_empty() && filter.is_some() {
            writeln!(out, "no such node {target}")?;
            return Ok(());
        }

        for snapshot in snapshots {
            if snapshot.entries.is_empty() {
                writeln!(out, "{}: <empty chain>", snapshot.node_id)?;
                continue;
            }
            let parts: Vec<String> = snapshot
                .entries
                .iter()
                .map(|(height, short_hash)| format!("blockHeight {height}({short_hash})"))
                .collect();
            writeln!(out, "{}: {}", snapshot.node_id, parts.join("  "))?;
        }
        Ok(())
    }

    fn trace_asset<W: Write>(&mut self, asset_id: &str, limit: &str, out: &mut W) -> io::Result<()> {
        let Some(master) = &self.master else {
            writeln!(out, "no master process yet; run `initiate fullNodes L` first")?;
            return Ok(());
        };

        let limit = if limit == "ALL" {
            None
        } else {
            match limit.parse::<usize>() {
                Ok(k) => Some(k),
                Err(_) => {
                    writeln!(out, "k must be an integer or ALL")?;
                    return Ok(());
                }
            }
        };

        let history = master.trace_asset(asset_id, limit);
        if history.is_empty() {
            writeln!(out, "[master] no txs for asset {asset_id}")?;
            return Ok(());
        }

        for entry in history {
            let txid = entry.tx.txid.to_string();
            let block_hash = entry.block_hash.to_string();
            writeln!(
                out,
                "[blockHeight {}, txID: {}..., blockHash: {}...]",
                entry.height,
                &txid[..8],
                &block_hash[..8]
            )?;
            for (i, input) in entry.tx.inputs.iter().enumerate() {
                let txid_ref = input.txid_ref.to_string();
                writeln!(out, "   input#{i}: ({}..., {})", &txid_ref[..8], input.index)?;
            }
            for (j, output) in entry.tx.outputs.iter().enumerate() {
                writeln!(
                    out,
                    "   output#{j}: asset={}, portion={}, pubKeyHash={}...",
                    output.asset_id,
                    output.portion,
                    &output.pubkey_hash[..8]
                )?;
            }
        }
        Ok(())
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "=== daChain controller ===")?;
    writeln!(out, "commands:")?;
    writeln!(out, "  initiate daChain N")?;
    writeln!(out, "  initiate fullNodes L")?;
    writeln!(out, "  run userProcess")?;
    writeln!(out, "  stop userProcess")?;
    writeln!(out, "  mine F0")?;
    writeln!(out, "  verify-transaction F0")?;
    writeln!(out, "  snapshot daChain ALL | snapshot daChain F0")?;
    writeln!(out, "  trace asset-0 ALL | trace asset-0 5")?;
    writeln!(out, "  exit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_script(script: &str) -> String {
        let mut shell = Shell::new(0, Duration::from_millis(5), 0.0);
        let mut out = Vec::new();
        shell.run(Cursor::new(script), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_initiate_and_snapshot() {
        let output = run_script(
            "initiate daChain 2\ninitiate fullNodes 3\nsnapshot daChain ALL\nexit\n",
        );

        assert!(output.contains("[genesis] created with 2 assets"));
        assert!(output.contains("created 4 wallets (2 genesis owners, 2 extra participants)"));
        assert!(output.contains("3 full nodes created and fully meshed"));
        assert!(output.contains("F0: blockHeight 0("));
        assert!(output.contains("F2: blockHeight 0("));
    }

    #[test]
    fn test_double_initiate_is_refused() {
        let output = run_script("initiate daChain 2\ninitiate daChain 2\nexit\n");
        assert!(output.contains("daChain is already initialized"));
    }

    #[test]
    fn test_mine_with_empty_mempool_reports_failure() {
        let output =
            run_script("initiate daChain 1\ninitiate fullNodes 1\nmine F0\nmine F9\nexit\n");

        assert!(output.contains("[F0] mining failed: no valid transactions to mine"));
        assert!(output.contains("no such node F9"));
    }

    #[test]
    fn test_trace_without_history_and_bad_limit() {
        let output = run_script(
            "initiate daChain 1\ninitiate fullNodes 1\ntrace asset-9 ALL\ntrace asset-0 x\n\
             trace asset-0 1\nexit\n",
        );

        assert!(output.contains("[master] no txs for asset asset-9"));
        assert!(output.contains("k must be an integer or ALL"));
        assert!(output.contains("[blockHeight 0, txID: "));
    }

    #[test]
    fn test_commands_require_initialization() {
        let output = run_script("snapshot daChain ALL\nverify-transaction F0\nmine F0\nexit\n");

        assert!(output.contains("no master process yet"));
        assert!(output.contains("no such node F0"));
    }

    #[test]
    fn test_user_process_lifecycle() {
        let output = run_script(
            "initiate daChain 2\ninitiate fullNodes 2\nrun userProcess\nstop userProcess\n\
             stop userProcess\nexit\n",
        );

        assert!(output.contains("[userProcess] started"));
        assert!(output.contains("[userProcess] stopped"));
        assert!(output.contains("userProcess is not running"));
    }

    #[test]
    fn test_unknown_command() {
        let output = run_script("frobnicate\nexit\n");
        assert!(output.contains("unknown command"));
    }
}
