use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tracing_subscriber::EnvFilter;
use zephyr_headers::{
    CheckpointTable, ChainTree, JsonlSource, Network, NetworkParameters, Registry, import_all,
};

fn print_banner(network: Network) {
    let rule = "═══════════════════════════════════════════════════════════════════════════════";
    println!("{}", rule.bright_magenta());
    println!("{}", "Zephyr header store".bright_cyan().bold());
    println!("{}", format!("network: {network}").bright_yellow());
    println!("{}", rule.bright_magenta());
    println!();
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NetworkArg {
    Mainnet,
    Testnet,
    Regtest,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Testnet => Network::Testnet,
            NetworkArg::Regtest => Network::Regtest,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "zephyr-headers")]
#[command(about = "Header-chain store for Zephyr light clients", long_about = None)]
struct Args {
    /// Data directory; testnet and regtest use a subdirectory
    #[arg(long, env = "ZEPHYR_DATA_DIR", default_value = "./data")]
    datadir: PathBuf,

    #[arg(long, value_enum, default_value_t = NetworkArg::Mainnet)]
    network: NetworkArg,

    /// Checkpoint JSON replacing the built-in table
    #[arg(long)]
    checkpoints: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import headers from a JSON-lines file
    Import { file: PathBuf },
    /// Show every chain of the tree
    Info,
    /// Print the canonical header at HEIGHT
    Header { height: u32 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let network = Network::from(args.network);
    print_banner(network);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut params = NetworkParameters::for_network(network);
    if let Some(path) = &args.checkpoints {
        params = params.with_checkpoints(CheckpointTable::from_file(path)?);
    }
    let dir = match network {
        Network::Mainnet => args.datadir.clone(),
        other => args.datadir.join(other.to_string()),
    };

    let registry = Registry::new();
    let outcome = match registry.open_tree(params, &dir) {
        Ok(tree) => run(&tree, args.command),
        Err(e) => Err(e.into()),
    };
    // Flush whatever was stored, even when the command failed halfway.
    let closed = registry.shutdown();
    outcome?;
    closed?;
    Ok(())
}

fn run(tree: &ChainTree, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Import { file } => {
            let mut source = JsonlSource::open(&file)?;
            let report = import_all(tree, &mut source)?;
            println!(
                "{} {} extended, {} forked, {} known, {} rejected, {} swaps",
                "✓".bright_green(),
                report.extended,
                report.forked,
                report.known,
                report.rejected.len(),
                report.swaps
            );
            for rejection in &report.rejected {
                let at = rejection
                    .height
                    .map_or_else(|| "?".to_string(), |h| h.to_string());
                println!("  {} {at}: {}", "✗".bright_red(), rejection.error);
            }
        }
        Command::Info => print_info(tree)?,
        Command::Header { height } => {
            let root = tree.root();
            let header = tree.read_header(root, height)?;
            println!("{}", format!("height {height}").bright_cyan());
            println!("hash     {}", header.hash());
            println!("prev     {}", header.prev_block);
            println!("version  {}", header.version);
            println!("time     {}", header.time);
            println!("bits     {:#010x}", header.bits);
            println!("nonce    {}", header.nonce);
            println!("raw      {}", header.to_hex());
        }
    }
    Ok(())
}

fn print_info(tree: &ChainTree) -> Result<(), Box<dyn std::error::Error>> {
    let root = tree.root();
    for chain in tree.chains() {
        let info = tree.info(chain)?;
        let label = if chain == root {
            "canonical".bright_green().bold()
        } else {
            "fork".yellow()
        };
        let tip = info
            .tip_height
            .map_or_else(|| "-".to_string(), |h| h.to_string());
        let tip_hash = info
            .tip_hash
            .map_or_else(|| "-".to_string(), |h| h.to_string());
        let parent = info
            .parent
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "{chain} {label} forkpoint {} tip {tip} {tip_hash} parent {parent}",
            info.forkpoint
        );
    }
    println!("generation {}", tree.generation());
    Ok(())
}
