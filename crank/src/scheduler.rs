//! Cycle scheduler
//!
//! Wallets are processed in consecutive batches. Every wallet in a batch runs
//! as its own task; the next batch starts only once all of them have
//! settled. After the last batch the scheduler counts down to the next cycle.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::processor::NodeProcessor;

/// Wallets processed concurrently per batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// 12 hours
pub const DEFAULT_INTERVAL_MINS: u64 = 720;

/// Outcome of one pass over every wallet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub active: usize,
    pub failed: usize,
}

/// Renders the wait between cycles
pub trait CountdownSink: Send + Sync {
    fn tick(&self, remaining: Duration);
    fn finish(&self);
}

/// `⏳ Next cycle in: HH:MM:SS`, redrawn in place
pub struct ConsoleCountdown;

impl CountdownSink for ConsoleCountdown {
    fn tick(&self, remaining: Duration) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\r⏳ Next cycle in: {}", format_hms(remaining));
        let _ = stdout.flush();
    }

    fn finish(&self) {
        println!("\r✅ Starting new cycle...                ");
    }
}

/// Countdown that renders nothing
pub struct SilentCountdown;

impl CountdownSink for SilentCountdown {
    fn tick(&self, _remaining: Duration) {}
    fn finish(&self) {}
}

pub fn format_hms(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Wait out `interval`, ticking the sink once per second
pub async fn countdown(interval: Duration, sink: &dyn CountdownSink) {
    let mut remaining = interval;
    let step = Duration::from_secs(1);

    while !remaining.is_zero() {
        sink.tick(remaining);
        let wait = remaining.min(step);
        tokio::time::sleep(wait).await;
        remaining -= wait;
    }
    sink.tick(Duration::ZERO);
    sink.finish();
}

pub struct CycleScheduler {
    processor: Arc<NodeProcessor>,
    addresses: Vec<String>,
    batch_size: usize,
    interval: Duration,
    countdown: Box<dyn CountdownSink>,
}

impl CycleScheduler {
    pub fn new(
        processor: Arc<NodeProcessor>,
        addresses: Vec<String>,
        batch_size: usize,
        interval: Duration,
        countdown: Box<dyn CountdownSink>,
    ) -> Self {
        Self {
            processor,
            addresses,
            batch_size: batch_size.max(1),
            interval,
            countdown,
        }
    }

    /// Process every wallet once, batch by batch
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        for (index, batch) in self.addresses.chunks(self.batch_size).enumerate() {
            let first = index * self.batch_size;
            info!(
                "Processing batch {}, wallets {} to {}",
                index + 1,
                first,
                first + batch.len()
            );

            let handles: Vec<_> = batch
                .iter()
                .cloned()
                .map(|address| {
                    let processor = self.processor.clone();
                    tokio::spawn(async move { processor.process(&address).await })
                })
                .collect();

            for result in futures::future::join_all(handles).await {
                match result {
                    Ok(true) => summary.active += 1,
                    Ok(false) => summary.failed += 1,
                    Err(e) => {
                        error!("Wallet task failed: {}", e);
                        summary.failed += 1;
                    }
                }
            }
        }

        summary
    }

    /// Cycle forever, counting down between cycles
    pub async fn run(&self) {
        let mut cycle = 1u64;
        loop {
            info!("Starting cycle {} ({} wallets)", cycle, self.addresses.len());
            let summary = self.run_cycle().await;
            info!(
                "All wallets processed: {} active, {} failed. Starting countdown...",
                summary.active, summary.failed
            );

            countdown(self.interval, self.countdown.as_ref()).await;
            cycle += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Ticks(Mutex<Vec<Duration>>, Mutex<bool>);

    impl CountdownSink for Arc<Ticks> {
        fn tick(&self, remaining: Duration) {
            self.0.lock().unwrap().push(remaining);
        }
        fn finish(&self) {
            *self.1.lock().unwrap() = true;
        }
    }

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::from_secs(DEFAULT_INTERVAL_MINS * 60)), "12:00:00");
        assert_eq!(format_hms(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_hms(Duration::ZERO), "00:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_every_second_and_waits_full_interval() {
        let ticks = Arc::new(Ticks::default());
        let started = tokio::time::Instant::now();

        countdown(Duration::from_secs(3), &ticks).await;

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        let seen = ticks.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(2),
                Duration::from_secs(1),
                Duration::ZERO
            ]
        );
        assert!(*ticks.1.lock().unwrap());
    }
}
