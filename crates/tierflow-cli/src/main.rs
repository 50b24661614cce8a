//! Tierflow CLI
//!
//! Command-line interface for operating a compensation ledger.

use clap::{Parser, Subcommand};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tierflow_core::{Address, Payment, PoolKind, Timestamp};
use tierflow_node::config::LoggingConfig;
use tierflow_node::{CompensationEngine, FixedPriceOracle, NodeConfig, StaticKycProvider};

#[derive(Parser)]
#[command(name = "tierflow")]
#[command(author = "Tierflow Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Tierflow - package-based compensation and distribution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "tierflow.toml")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Grow a random network and run due distributions
    Simulate {
        /// Number of users to register
        #[arg(short, long, default_value = "100")]
        users: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Persist into this data directory (in-memory when omitted)
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Run a pool distribution cycle to completion
    Distribute {
        /// Pool: leader, help, club, level-reinvest, upline-reinvest
        #[arg(short, long)]
        pool: PoolKind,

        /// Data directory
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Recipients per batch
        #[arg(short, long)]
        batch: Option<usize>,
    },

    /// Show a user snapshot
    User {
        /// Address (hex)
        #[arg(short, long)]
        address: Address,

        /// Data directory
        #[arg(short, long)]
        data: Option<PathBuf>,
    },

    /// Show pools and global statistics
    Stats {
        /// Data directory
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default configuration
    Init {
        /// Output file
        #[arg(short, long, default_value = "tierflow.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false))
            .init();
    }
}

fn expand_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let path = expand_path(path);
    if path.exists() {
        Ok(NodeConfig::load(&path)?)
    } else {
        Ok(NodeConfig::default())
    }
}

fn open_engine(config: &NodeConfig, persistent: bool) -> anyhow::Result<CompensationEngine> {
    let oracle = Arc::new(FixedPriceOracle::new());
    let kyc = Arc::new(StaticKycProvider::new());
    let engine = if persistent {
        CompensationEngine::open(config, oracle, kyc)?
    } else {
        CompensationEngine::in_memory(config, oracle, kyc)?
    };
    Ok(engine)
}

fn with_data_dir(mut config: NodeConfig, data: Option<&PathBuf>) -> NodeConfig {
    if let Some(dir) = data {
        config.node.data_dir = expand_path(dir).to_string_lossy().into_owned();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Config { action: ConfigCommands::Init { output, force } } => {
            let output = expand_path(&output);
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            std::fs::write(&output, NodeConfig::default().to_toml_string()?)?;
            println!("Wrote default configuration to {}", output.display());
        }

        Commands::Simulate { users, seed, data } => {
            let persistent = data.is_some();
            let config = with_data_dir(config, data.as_ref());
            let engine = open_engine(&config, persistent)?;
            let end = simulate(&engine, users, seed).await?;

            let runs = engine.run_due_distributions(end).await?;
            for run in &runs {
                tracing::info!(
                    pool = %run.last.kind,
                    batches = run.batches,
                    paid = run.paid,
                    "Distribution run"
                );
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "globals": engine.global_stats(),
                    "pools": engine.pool_snapshots(),
                }))?
            );
        }

        Commands::Distribute { pool, data, batch } => {
            let mut config = with_data_dir(config, data.as_ref());
            if let Some(batch) = batch {
                config.distribution.batch_size = batch;
            }
            let engine = open_engine(&config, true)?;

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current batch");
                    flag.store(true, Ordering::SeqCst);
                }
            });

            let run = engine
                .run_distribution_to_completion(pool, tierflow_node::unix_now(), cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }

        Commands::User { address, data } => {
            let config = with_data_dir(config, data.as_ref());
            let engine = open_engine(&config, true)?;
            let snapshot = engine.user_snapshot(&address)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::Stats { data } => {
            let config = with_data_dir(config, data.as_ref());
            let engine = open_engine(&config, true)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "globals": engine.global_stats(),
                    "pools": engine.pool_snapshots(),
                }))?
            );
        }
    }

    Ok(())
}

/// Register `users` users with random sponsors and packages
///
/// Users join ten minutes apart; every tenth join a random member withdraws
/// half of their balance. Returns the simulated clock at the end.
async fn simulate(engine: &CompensationEngine, users: usize, seed: u64) -> anyhow::Result<Timestamp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let plan = engine.config().clone();
    let min_withdrawal = plan.withdrawal.min_withdrawal();
    let mut now = tierflow_node::unix_now();
    let mut members: Vec<Address> = engine
        .ledger()
        .read(|s| s.users().map(|u| u.address).collect());

    tracing::info!(users, seed, existing = members.len(), "Starting simulation");

    for i in 0..users {
        now += 600;
        let address = Address::from_label(format!("sim-{}-{}-{}", seed, members.len(), i).as_bytes());
        let sponsor = if members.is_empty() {
            None
        } else {
            Some(members[rng.gen_range(0..members.len())])
        };
        let tier = rng.gen_range(1..=plan.top_tier());
        let price = plan.package(tier)?.price();

        engine
            .register(address, sponsor, tier, Payment::stable(price), now)
            .await?;
        members.push(address);

        if i % 10 == 9 {
            let who = members[rng.gen_range(0..members.len())];
            let balance = engine.user_snapshot(&who)?.withdrawable_balance;
            let amount = balance / 2;
            if amount >= min_withdrawal {
                match engine.withdraw(who, amount, now) {
                    Ok(receipt) => tracing::debug!(
                        user = %who,
                        net = receipt.net_payout,
                        "Simulated withdrawal"
                    ),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(user = %who, error = %e, "Simulated withdrawal deferred")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    Ok(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distribute() {
        let cli = Cli::try_parse_from([
            "tierflow", "distribute", "--pool", "help", "--batch", "50",
        ])
        .unwrap();
        match cli.command {
            Commands::Distribute { pool, batch, data } => {
                assert_eq!(pool, PoolKind::GlobalHelp);
                assert_eq!(batch, Some(50));
                assert!(data.is_none());
            }
            _ => panic!("expected distribute"),
        }
        assert_eq!(cli.config, PathBuf::from("tierflow.toml"));
    }

    #[test]
    fn test_parse_rejects_unknown_pool() {
        assert!(Cli::try_parse_from(["tierflow", "distribute", "--pool", "lottery"]).is_err());
    }

    #[test]
    fn test_expand_path_leaves_plain_paths() {
        assert_eq!(expand_path(Path::new("/var/lib/tierflow")), PathBuf::from("/var/lib/tierflow"));
    }

    #[test]
    fn test_with_data_dir_overrides() {
        let config = with_data_dir(NodeConfig::default(), Some(&PathBuf::from("/tmp/tf")));
        assert_eq!(config.node.data_dir, "/tmp/tf");
    }

    #[tokio::test]
    async fn test_simulation_is_deterministic() {
        let config = NodeConfig::default();
        let a = open_engine(&config, false).unwrap();
        let b = open_engine(&config, false).unwrap();
        simulate(&a, 30, 7).await.unwrap();
        simulate(&b, 30, 7).await.unwrap();

        let (sa, sb) = (a.global_stats(), b.global_stats());
        assert_eq!(sa.total_users, 30);
        assert_eq!(sa.total_volume, sb.total_volume);
        assert_eq!(sa.outstanding_balances, sb.outstanding_balances);
    }
}
