//! Configuration for the crank program

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{ClientProfile, DEFAULT_API_URL, DEFAULT_DASHBOARD_URL};
use crate::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL_MINS};

/// Light Node Crank
#[derive(Parser, Debug, Clone)]
#[command(name = "lightnode-crank")]
#[command(about = "Cycles light nodes for a set of wallets", long_about = None)]
pub struct Config {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Newline-delimited private keys
    #[arg(long, env = "DATA_PATH", default_value = "data.txt")]
    pub data_path: PathBuf,

    /// Newline-delimited proxies (missing file = no proxies)
    #[arg(long, env = "PROXY_PATH", default_value = "proxy.txt")]
    pub proxy_path: PathBuf,

    /// Worker API base URL (node actions, status, points)
    #[arg(long, env = "API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Dashboard API base URL
    #[arg(long, env = "DASHBOARD_URL", default_value = DEFAULT_DASHBOARD_URL)]
    pub dashboard_url: String,

    /// Wallets processed concurrently per batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Minutes between cycles
    #[arg(long, env = "INTERVAL_MINS", default_value_t = DEFAULT_INTERVAL_MINS)]
    pub interval_mins: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Cycle all wallets forever (default)
    Run,
    /// Run a single cycle and exit
    Once,
    /// Show derived wallet addresses and proxy count
    List,
    /// Check connectivity to both APIs through a sampled proxy
    Test,
    /// Collect each wallet's referral code and keep the ones that verify
    Codes {
        /// File the valid codes are appended to
        #[arg(long, env = "CODES_PATH", default_value = "valid_codes.txt")]
        output: PathBuf,
    },
}

impl Config {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_mins * 60)
    }

    pub fn worker_profile(&self) -> ClientProfile {
        ClientProfile::worker(&self.api_url, Duration::from_secs(self.timeout_secs))
    }

    pub fn dashboard_profile(&self) -> ClientProfile {
        ClientProfile::dashboard(&self.dashboard_url, Duration::from_secs(self.timeout_secs))
    }
}
