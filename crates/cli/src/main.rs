use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use voty_common::utils::timestamp_secs;
use voty_common::{init_logging, Configuration};
use voty_governance::phase::humanize;
use voty_governance::requirements::{
    required_coin_types_of_boolean, required_coin_types_of_decimal,
};
use voty_governance::{
    CapabilityRegistry, ChoiceTally, DecimalExpression, Did, EngineConfig, Evaluator,
    PhaseDurations, RawExpression, SnapshotSet, StaticChainReader, Vote,
};

const ENV_PREFIX: &str = "VOTY";

#[derive(Parser)]
#[command(name = "voty", author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the lifecycle phase of a process
    Phase {
        /// Phase durations as JSON `[{"name", "seconds"}]`, or @file
        #[arg(long)]
        durations: String,
        /// Unix time the process was confirmed at
        #[arg(long)]
        confirmed_at: Option<u64>,
        /// Unix time to evaluate at, defaults to now
        #[arg(long)]
        now: Option<u64>,
    },
    /// List the coin types whose snapshots a rule needs
    Requirements {
        /// Rule as JSON, or @file
        #[arg(long)]
        rule: String,
        /// Kind of rule
        #[arg(long, value_enum, default_value_t = RuleKind::Boolean)]
        kind: RuleKind,
    },
    /// Check an eligibility rule for an identity
    Check {
        /// Rule as JSON, or @file
        #[arg(long)]
        rule: String,
        /// Identity to check
        #[arg(long)]
        did: String,
        /// Snapshots as JSON `{"<coin type>": "<handle>"}`, or @file
        #[arg(long, default_value = "{}")]
        snapshots: String,
        /// Chain data fixture
        #[arg(long)]
        chain: Option<PathBuf>,
    },
    /// Calculate voting power for identities
    Power {
        /// Rule as JSON, or @file
        #[arg(long)]
        rule: String,
        /// Identities to evaluate
        #[arg(long = "did", required = true)]
        dids: Vec<String>,
        /// Snapshots as JSON `{"<coin type>": "<handle>"}`, or @file
        #[arg(long, default_value = "{}")]
        snapshots: String,
        /// Chain data fixture
        #[arg(long)]
        chain: Option<PathBuf>,
    },
    /// Tally cast votes
    Tally {
        /// Votes as a JSON list, or @file
        #[arg(long)]
        votes: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RuleKind {
    Boolean,
    Decimal,
}

/// Inline JSON, or the contents of the file named after `@`
fn json_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
        }
        None => Ok(value.to_string()),
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env(ENV_PREFIX)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.to_lowercase();
    }
    config.validate()?;
    Ok(config)
}

fn evaluator(config: EngineConfig, chain: Option<&PathBuf>) -> Result<Evaluator> {
    let reader = match chain {
        Some(path) => StaticChainReader::from_json_file(path)
            .with_context(|| format!("Failed to load chain data from {}", path.display()))?,
        None => StaticChainReader::default(),
    };
    Ok(Evaluator::new(
        config,
        Arc::new(CapabilityRegistry::standard()),
        Arc::new(reader),
    ))
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|time| time.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn format_coin_types(coin_types: &BTreeSet<u32>) -> String {
    if coin_types.is_empty() {
        return "none".to_string();
    }
    coin_types
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn show_phase(durations: &PhaseDurations, confirmed_at: Option<u64>, now: u64) {
    let current = durations.phase(now, confirmed_at);
    println!("phase: {}", current);

    match confirmed_at {
        Some(confirmed_at) => {
            for window in durations.windows(confirmed_at) {
                let marker = if current.is(window.name) { "*" } else { " " };
                println!(
                    "{} {:<12} {:<12} {} .. {}",
                    marker,
                    window.name,
                    humanize(window.length()),
                    format_time(window.start),
                    format_time(window.end)
                );
            }
        }
        None => {
            for duration in durations.iter() {
                println!("  {:<12} {}", duration.name, humanize(duration.seconds));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging)?;

    match &cli.command {
        Commands::Phase {
            durations,
            confirmed_at,
            now,
        } => {
            let durations = PhaseDurations::from_json(&json_arg(durations)?)?;
            let now = now.unwrap_or_else(timestamp_secs);
            show_phase(&durations, *confirmed_at, now);
        }
        Commands::Requirements { rule, kind } => {
            let raw = RawExpression::from_json(&json_arg(rule)?)?;
            let registry = CapabilityRegistry::standard();
            let coin_types = match kind {
                RuleKind::Boolean => {
                    required_coin_types_of_boolean(&raw, &registry, config.parse_options())?
                }
                RuleKind::Decimal => required_coin_types_of_decimal(&raw, &registry)?,
            };
            println!("{}", format_coin_types(&coin_types));
        }
        Commands::Check {
            rule,
            did,
            snapshots,
            chain,
        } => {
            let raw = RawExpression::from_json(&json_arg(rule)?)?;
            let snapshots: SnapshotSet = serde_json::from_str(&json_arg(snapshots)?)
                .context("Failed to parse snapshots")?;
            let did = Did::new(did.as_str());
            let evaluator = evaluator(config, chain.as_ref())?;

            let eligible = evaluator.check_boolean(&raw, &did, &snapshots).await?;
            info!(%did, eligible, "eligibility checked");
            println!("{}: {}", did, if eligible { "eligible" } else { "not eligible" });
        }
        Commands::Power {
            rule,
            dids,
            snapshots,
            chain,
        } => {
            let raw = RawExpression::from_json(&json_arg(rule)?)?;
            let snapshots: SnapshotSet = serde_json::from_str(&json_arg(snapshots)?)
                .context("Failed to parse snapshots")?;
            let dids: Vec<Did> = dids.iter().map(|did| Did::new(did.as_str())).collect();
            let evaluator = evaluator(config, chain.as_ref())?;

            let expr = DecimalExpression::parse(&raw, evaluator.registry())?;
            let powers = evaluator.powers_of(&expr, &dids, &snapshots).await?;
            for did in &dids {
                if let Some(power) = powers.get(did) {
                    println!("{}: {}", did, power.normalize());
                }
            }
        }
        Commands::Tally { votes } => {
            let votes: Vec<Vote> =
                serde_json::from_str(&json_arg(votes)?).context("Failed to parse votes")?;
            let tally = ChoiceTally::from_votes(&votes)?;
            for (option, power) in tally.ranked() {
                println!(
                    "{:<16} {:>12} {:>7}%",
                    option,
                    power.normalize(),
                    tally.percentage(option)?.round_dp(2)
                );
            }
            println!("total: {}", tally.total.normalize());
        }
    }

    Ok(())
}
