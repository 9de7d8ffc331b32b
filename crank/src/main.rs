//! Light Node Crank
//!
//! Cycles the light node of every configured wallet:
//! stop → check → start (if needed) → verify → record points,
//! in batches of concurrent wallets, then waits for the next cycle.
//!
//! Input files:
//! - data.txt: one private key per line
//! - proxy.txt: one proxy per line (optional)

use clap::Parser;
use lightnode_crank::{
    commands,
    config::{self, Config},
    scheduler::{ConsoleCountdown, CountdownSink, CycleScheduler, SilentCountdown},
    status::ConsoleSink,
    HttpNodeApi, IdentityStore, NodeProcessor, ProxyPool, StatusBoard, Timings,
};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse configuration
    let config = Config::parse();

    info!("Light Node Crank");
    info!("API URL: {}", config.api_url);

    // Load wallets and proxies
    let identities = match IdentityStore::load_file(&config.data_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Error initializing: {}", e);
            return Err(e.into());
        }
    };
    let proxies = Arc::new(ProxyPool::load(&config.proxy_path));
    if proxies.is_empty() {
        warn!("No proxies loaded, requests go out directly");
    }

    let api = Arc::new(HttpNodeApi::new(
        config.worker_profile(),
        config.dashboard_profile(),
        proxies.clone(),
    ));

    // Every subcommand is raced against Ctrl-C; in-flight requests are dropped on interrupt
    tokio::select! {
        result = execute(&config, identities, proxies, api) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            info!("Shutting down...");
        }
    }

    Ok(())
}

async fn execute(
    config: &Config,
    identities: Arc<IdentityStore>,
    proxies: Arc<ProxyPool>,
    api: Arc<HttpNodeApi>,
) -> Result<(), Box<dyn std::error::Error>> {
    match &config.command {
        Some(config::Command::List) => {
            info!("Managing {} wallets ({} proxies):", identities.len(), proxies.len());
            for address in identities.addresses() {
                info!("  {}", address);
            }
            return Ok(());
        }
        Some(config::Command::Test) => {
            let report = commands::test_connectivity(&*api, &identities.addresses()[0]).await;
            if !report.is_ok() {
                warn!("Connectivity test finished with failures");
            }
            return Ok(());
        }
        Some(config::Command::Codes { output }) => {
            info!("Checking referral codes for {} wallets...", identities.len());
            let codes =
                commands::collect_valid_codes(&*api, identities.addresses(), config.batch_size)
                    .await;
            info!("Found {} valid codes", codes.len());
            if !codes.is_empty() {
                commands::append_codes(output, &codes)?;
                info!("✓ Saved to {}", output.display());
            }
            return Ok(());
        }
        Some(config::Command::Once) | Some(config::Command::Run) | None => {
            // Continue to cycle loop
        }
    }

    let board = Arc::new(StatusBoard::new(
        identities.addresses(),
        &proxies,
        Box::new(ConsoleSink),
    ));
    let processor = Arc::new(NodeProcessor::new(
        api,
        identities.clone(),
        board,
        proxies.clone(),
        Timings::default(),
    ));

    info!("Managing {} wallets with {} proxies", identities.len(), proxies.len());
    info!(
        "Batch size: {}, cycle interval: {} minutes",
        config.batch_size, config.interval_mins
    );

    let run_once = matches!(config.command, Some(config::Command::Once));
    let countdown: Box<dyn CountdownSink> = if run_once {
        Box::new(SilentCountdown)
    } else {
        Box::new(ConsoleCountdown)
    };
    let scheduler = CycleScheduler::new(
        processor,
        identities.addresses().to_vec(),
        config.batch_size,
        config.interval(),
        countdown,
    );

    if run_once {
        let summary = scheduler.run_cycle().await;
        info!("Cycle complete: {} active, {} failed", summary.active, summary.failed);
    } else {
        scheduler.run().await;
    }

    Ok(())
}
