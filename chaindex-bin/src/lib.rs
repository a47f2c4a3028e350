//! chaindex executable.
//!
//! Three long-running subcommands share one store: `run` (the single-writer
//! indexer engine), `api` (the read-only HTTP façade plus event stream) and
//! `balance-worker` (the deferred balance reconciler).

mod config;
mod helper;
mod subcommand;

use std::path::Path;

use clap::{Arg, Command};

pub use config::Config;

pub fn run_app() -> anyhow::Result<()> {
    let matches = Command::new("chaindex")
        .version(env!("CARGO_PKG_VERSION"))
        .about("UTXO-chain indexer and read-only query service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the TOML configuration file")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Run the indexer engine (the single writer)"))
        .subcommand(Command::new("api").about("Serve the read-only HTTP query facade"))
        .subcommand(
            Command::new("balance-worker")
                .about("Reconcile balances deferred by the fast pass"),
        )
        .get_matches();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load(matches.get_one::<String>("config").map(Path::new))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match matches.subcommand() {
        Some(("run", _)) => runtime.block_on(subcommand::run(config)),
        Some(("api", _)) => runtime.block_on(subcommand::api(config)),
        Some(("balance-worker", _)) => runtime.block_on(subcommand::balance_worker(config)),
        _ => unreachable!("subcommand is required"),
    }
}
