//! Outbound proxy pool
//!
//! Proxies are loaded once and sampled uniformly at random per request.
//! There is no health tracking: a dead proxy shows up as a request failure
//! and is handled by the caller's retry layer.

use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{error, info};

/// Immutable set of proxy endpoints
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<String>,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>) -> Self {
        Self { proxies }
    }

    /// Parse newline-delimited proxies, ignoring blank lines
    pub fn parse(raw: &str) -> Self {
        let proxies = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { proxies }
    }

    /// Load proxies from a file.
    ///
    /// A read failure is logged and yields an empty pool, which means every
    /// request goes out directly.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let pool = Self::parse(&raw);
                info!("Loaded {} proxies from {}", pool.len(), path.display());
                pool
            }
            Err(e) => {
                error!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Pick a random proxy (with replacement), or None if the pool is empty
    pub fn next(&self) -> Option<&str> {
        self.proxies
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Give scheme-less entries (`user:pass@host:port`, `host:port`) an http scheme
pub fn normalize(proxy: &str) -> String {
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    }
}
