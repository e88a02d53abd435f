use std::io;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

mod shell;
use shell::Shell;

#[derive(Parser)]
#[command(name = "dachain")]
#[command(about = "daChain - fractional asset ownership on a pedagogical UTXO blockchain")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seed for wallet generation and generated traffic
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Milliseconds between generated transactions
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Fraction of deliberately corrupted transactions
    #[arg(long, default_value = "0.2")]
    invalid_ratio: f64,
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut shell = Shell::new(
        cli.seed,
        Duration::from_millis(cli.interval_ms),
        cli.invalid_ratio,
    );
    let stdin = io::stdin();
    let stdout = io::stdout();
    shell.run(stdin.lock(), &mut stdout.lock())
}
