use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{
    constants::DEFAULT_DIFFICULTY, now_millis, Block, Chain, ChainConfig, ChainStore,
};
use ledger_storage::{open_chain, SledStore};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Hash-linked proof-of-work ledger")]
struct Cli {
    /// Mine on all cores instead of the calling thread
    #[arg(long, global = true)]
    parallel: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a two-block chain in memory, tamper with it and validate before and after
    Demo {
        #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,
    },
    /// Create a genesis-only chain in the data directory
    Init {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,
    },
    /// Mine a block holding the given transactions and append it
    Append {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        /// Transaction payload, repeat for several
        #[arg(long = "tx")]
        txs: Vec<String>,
    },
    /// Print the stored chain as JSON
    Show {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Check the stored chain, exit status 1 when it is invalid
    Validate {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Add a transaction to a stored block and rehash only that block
    Tamper {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        #[arg(long)]
        index: u64,
        #[arg(long = "tx")]
        tx: String,
    },
}

fn main() -> Result<ExitCode> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo { difficulty } => demo(ChainConfig::new(difficulty)?.parallel(cli.parallel)),
        Command::Init {
            data_dir,
            difficulty,
        } => {
            let (_store, chain) = open_chain::<String, _>(&data_dir, ChainConfig::new(difficulty)?)?;
            println!(
                "chain at {} has {} block(s), difficulty {}",
                data_dir.display(),
                chain.len(),
                chain.difficulty()
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Append { data_dir, txs } => {
            let (store, mut chain) = load(&data_dir)?;
            chain.set_parallel_mining(cli.parallel);
            let index = chain.len() as u64;
            chain.append(Block::new(index, now_millis(), txs)?)?;
            chain.save_to(&store)?;
            store.close()?;
            println!("{}", serde_json::to_string_pretty(chain.latest_block())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { data_dir } => {
            let (_store, chain) = load(&data_dir)?;
            println!("{}", serde_json::to_string_pretty(&chain)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { data_dir } => {
            let (_store, chain) = load(&data_dir)?;
            Ok(report(&chain))
        }
        Command::Tamper {
            data_dir,
            index,
            tx,
        } => {
            let (store, mut chain) = load(&data_dir)?;
            chain.tamper(index, tx)?;
            chain.save_to(&store)?;
            store.close()?;
            println!("tampered with block {index}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(data_dir: &Path) -> Result<(SledStore, Chain)> {
    let store = SledStore::open(data_dir)?;
    let chain = Chain::load_from(&store)?
        .with_context(|| format!("no chain in {}, run `ledger init` first", data_dir.display()))?;
    Ok((store, chain))
}

fn report(chain: &Chain) -> ExitCode {
    match chain.first_violation() {
        None => {
            println!("Is blockchain valid? true");
            ExitCode::SUCCESS
        }
        Some(violation) => {
            println!("Is blockchain valid? false ({violation})");
            ExitCode::FAILURE
        }
    }
}

fn demo(config: ChainConfig) -> Result<ExitCode> {
    let mut chain: Chain = Chain::with_config(config)?;

    info!("Mining block 1...");
    chain.append(Block::new(1, now_millis(), vec!["Transaction 1".to_string()])?)?;

    info!("Mining block 2...");
    chain.append(Block::new(2, now_millis(), vec!["Transaction 2".to_string()])?)?;

    println!("{}", serde_json::to_string_pretty(&chain)?);
    report(&chain);

    info!("Tampering with block 1...");
    chain.tamper(1, "Tampered transaction".to_string())?;
    report(&chain);

    Ok(ExitCode::SUCCESS)
}
