//! Operational subcommands
//!
//! Connectivity checks and referral code collection. Both only read from the
//! APIs and never change node state.

use futures::future::join_all;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

use crate::client::{ApiError, NodeApi};
use crate::status::short_address;

/// HTTP status of the dashboard root. Any HTTP answer counts as reachable.
pub async fn ping_dashboard(api: &dyn NodeApi) -> Result<u16, ApiError> {
    match api.dashboard_index().await {
        Ok(()) => Ok(200),
        Err(ApiError::Status { code, .. }) => Ok(code),
        Err(e) => Err(e),
    }
}

/// Outcome of `test_connectivity`
#[derive(Debug)]
pub struct ConnectivityReport {
    pub dashboard: Result<u16, ApiError>,
    /// Start timestamp of the checked wallet's node
    pub worker: Result<Option<i64>, ApiError>,
}

impl ConnectivityReport {
    pub fn is_ok(&self) -> bool {
        self.dashboard.is_ok() && self.worker.is_ok()
    }
}

/// Check both APIs, using `address` for the worker status call
pub async fn test_connectivity(api: &dyn NodeApi, address: &str) -> ConnectivityReport {
    info!("Testing connectivity...");

    let dashboard = ping_dashboard(api).await;
    match &dashboard {
        Ok(code) => info!("✓ Dashboard API reachable (HTTP {})", code),
        Err(e) => error!("✗ Dashboard API unreachable: {}", e),
    }

    let worker = api.node_status(address).await;
    match &worker {
        Ok(Some(ts)) => info!(
            "✓ Worker API reachable, {} running since {}",
            short_address(address),
            ts
        ),
        Ok(None) => info!("✓ Worker API reachable, {} not running", short_address(address)),
        Err(e) => error!("✗ Worker API unreachable: {}", e),
    }

    ConnectivityReport { dashboard, worker }
}

/// A referral code the API accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCode {
    pub address: String,
    pub code: String,
}

async fn check_wallet_code(api: &dyn NodeApi, address: &str) -> Option<ValidCode> {
    let details = match api.wallet_details(address).await {
        Ok(details) => details,
        Err(e) => {
            error!("✗ Failed to fetch details for {}: {}", short_address(address), e);
            return None;
        }
    };

    let Some(code) = details.referral_code.filter(|c| !c.is_empty()) else {
        warn!("{} has no referral code", short_address(address));
        return None;
    };

    match api.verify_referral_code(&code).await {
        Ok(true) => {
            info!("✓ Valid code {} from {}", code, short_address(address));
            Some(ValidCode {
                address: address.to_string(),
                code,
            })
        }
        Ok(false) => {
            info!("✗ Code {} from {} is not valid", code, short_address(address));
            None
        }
        Err(e) => {
            error!("✗ Failed to verify code {}: {}", code, e);
            None
        }
    }
}

/// Fetch and verify every wallet's referral code, `batch_size` wallets at a
/// time. Returns only the codes that verified, in wallet order.
pub async fn collect_valid_codes(
    api: &dyn NodeApi,
    addresses: &[String],
    batch_size: usize,
) -> Vec<ValidCode> {
    let batch_size = batch_size.max(1);
    let mut valid = Vec::new();

    for (i, batch) in addresses.chunks(batch_size).enumerate() {
        info!("Checking codes batch {} ({} wallets)", i + 1, batch.len());
        let results = join_all(batch.iter().map(|address| check_wallet_code(api, address))).await;
        valid.extend(results.into_iter().flatten());
    }

    valid
}

/// Append one code per line to `path`, creating it if needed
pub fn append_codes(path: &Path, codes: &[ValidCode]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for code in codes {
        writeln!(file, "{}", code.code)?;
    }
    Ok(())
}
