/*!
 * Tunegate CLI - inspect and manage persisted upstream quotas
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tunegate::{
    cli_style,
    config::GatewayConfig,
    error::{TunegateError, EXIT_FATAL, EXIT_SUCCESS},
    logging,
    resilience::{QuotaReport, QuotaTracker, QuotaUsage},
};

const DEFAULT_CONFIG_PATH: &str = "tunegate.toml";

#[derive(Parser)]
#[command(name = "tunegate")]
#[command(version, about = "Quota, circuit, and rate-limit guard for upstream APIs", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration with built-in upstream presets
    Init {
        /// Where to write the configuration
        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show persisted quota usage for every configured upstream
    Status {
        /// Configuration file (built-in defaults when absent)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Zero the persisted quota of one upstream
    Reset {
        /// Upstream name as configured
        upstream: String,

        /// Configuration file (built-in defaults when absent)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<TunegateError>()
                .map_or(EXIT_FATAL, TunegateError::exit_code)
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, force } => init(&output, force),
        Commands::Status { config, json } => {
            let config = load_config(config.as_deref(), cli.verbose)?;
            status(&config, json)
        }
        Commands::Reset { upstream, config } => {
            let config = load_config(config.as_deref(), cli.verbose)?;
            reset(&config, &upstream)
        }
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> anyhow::Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    config.verbose |= verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    Ok(config)
}

fn init(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        return Err(TunegateError::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        ))
        .into());
    }

    GatewayConfig::default()
        .to_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

fn status(config: &GatewayConfig, json: bool) -> anyhow::Result<()> {
    let mut usages: BTreeMap<String, QuotaUsage> = BTreeMap::new();
    for (name, settings) in &config.upstreams {
        let path = config.quota_path(name);
        let usage = QuotaTracker::read_usage(name, settings.quota_config(), &path)
            .map_err(TunegateError::from)
            .with_context(|| format!("Failed to read quota state for {}", name))?;
        usages.insert(name.clone(), usage);
    }

    if json {
        let reports: BTreeMap<String, QuotaReport> = usages
            .into_iter()
            .map(|(name, usage)| (name, QuotaReport::from(usage)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("{}", cli_style::quota_table(&usages));
    }
    Ok(())
}

fn reset(config: &GatewayConfig, upstream: &str) -> anyhow::Result<()> {
    let settings = config.require_upstream(upstream)?;
    let tracker = QuotaTracker::new(
        upstream,
        settings.quota_config(),
        Some(config.quota_path(upstream)),
    );
    tracker.reset();
    println!("Reset quota for {}", upstream);
    Ok(())
}
