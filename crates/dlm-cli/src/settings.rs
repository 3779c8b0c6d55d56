//! Command line arguments and layered configuration
//!
//! Sources, lowest to highest precedence: the config file (`conf/dlm.*` unless
//! `--config` names one), `DLM__*` environment variables, then command line flags.
//! Environment keys use `__` as the path separator, e.g. `DLM__RETRY__COUNT=5`
//! sets `dlm.retry.count` and `DLM__RETRY__DELAY_MIN=50` sets
//! `dlm.retry.delay_min`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};

use dlm_core::config::{
    ENDPOINTS_PROPERTY, KEY_PREFIX_PROPERTY, NAME_PROPERTY, RETRY_COUNT_PROPERTY,
    RETRY_DELAY_MAX_PROPERTY, RETRY_DELAY_MIN_PROPERTY, SHORTCIRCUIT_PROPERTY,
};

const DEFAULT_CONFIG_FILE: &str = "conf/dlm";

/// Quorum locks over independent Redis servers
#[derive(Debug, Parser)]
#[command(name = "dlm", version)]
pub struct Cli {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long = "config", env = "DLM_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Redis endpoints, comma separated (`host:port` or `redis://` URLs)
    #[arg(short = 'e', long = "endpoints", value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Manager name used in logs
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// Acquisition attempts before giving up
    #[arg(long = "retry-count")]
    pub retry_count: Option<u32>,

    /// Minimum backoff between attempts, in milliseconds
    #[arg(long = "retry-delay-min")]
    pub retry_delay_min: Option<u64>,

    /// Maximum backoff between attempts, in milliseconds
    #[arg(long = "retry-delay-max")]
    pub retry_delay_max: Option<u64>,

    /// Wait for every node before deciding an acquisition
    #[arg(long = "wait-all")]
    pub wait_all: bool,

    /// Prefix prepended to resource names
    #[arg(long = "key-prefix")]
    pub key_prefix: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire a lock, hold it for a while, then release it
    Hold {
        /// Resource to lock
        resource: String,

        /// Lease duration in milliseconds
        #[arg(long = "ttl", default_value_t = 10_000)]
        ttl_ms: u64,

        /// Times the lease renews itself while held
        #[arg(long = "max-renew", default_value_t = 0)]
        max_renew: u32,

        /// How long to hold the lock, in milliseconds
        #[arg(long = "hold", default_value_t = 5_000)]
        hold_ms: u64,
    },

    /// Connect to every node and report which ones are reachable
    Probe,
}

fn environment() -> Environment {
    Environment::with_prefix("dlm")
        .separator("__")
        .keep_prefix(true)
        .try_parsing(true)
}

/// Build the layered configuration for `cli`
pub fn load(cli: &Cli) -> anyhow::Result<Config> {
    build(cli, environment())
}

fn build(cli: &Cli, env: Environment) -> anyhow::Result<Config> {
    let file = match &cli.config_file {
        Some(path) => File::from(path.as_path()).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let mut builder = Config::builder().add_source(file).add_source(env);

    if !cli.endpoints.is_empty() {
        builder = builder.set_override(ENDPOINTS_PROPERTY, cli.endpoints.clone())?;
    }
    if let Some(name) = &cli.name {
        builder = builder.set_override(NAME_PROPERTY, name.as_str())?;
    }
    if let Some(count) = cli.retry_count {
        builder = builder.set_override(RETRY_COUNT_PROPERTY, count as i64)?;
    }
    if let Some(delay) = cli.retry_delay_min {
        builder = builder.set_override(RETRY_DELAY_MIN_PROPERTY, delay)?;
    }
    if let Some(delay) = cli.retry_delay_max {
        builder = builder.set_override(RETRY_DELAY_MAX_PROPERTY, delay)?;
    }
    if cli.wait_all {
        builder = builder.set_override(SHORTCIRCUIT_PROPERTY, false)?;
    }
    if let Some(prefix) = &cli.key_prefix {
        builder = builder.set_override(KEY_PREFIX_PROPERTY, prefix.as_str())?;
    }

    Ok(builder.build()?)
}
