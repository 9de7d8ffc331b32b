//! Node processor
//!
//! Drives one wallet through a single attempt:
//! ```text
//! StoppingNode → CheckingStatus → [not running] StartingNode
//!     → VerifyingStatus → UpdatingPoints → Active
//! ```
//! Any failure in an attempt becomes `Error("Retry n/max: ...")`, followed by
//! a backoff and a fresh attempt from the stop step. After `max_attempts`
//! failures the wallet stays in Error until the next cycle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::client::{ActionRequest, ApiError, NodeApi, WalletDetails};
use crate::identity::{IdentityError, IdentityStore};
use crate::proxy::ProxyPool;
use crate::status::{NodeState, StatusBoard};

/// Delays and retry bounds for one wallet
#[derive(Debug, Clone)]
pub struct Timings {
    /// Pause after a start/stop action before checking status
    pub settle: Duration,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Status polls before giving up on a check
    pub poll_attempts: u32,
    /// Delay between failed attempts
    pub retry_backoff: Duration,
    /// Full attempts per wallet per cycle
    pub max_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            poll_interval: Duration::from_secs(2),
            poll_attempts: 20,
            retry_backoff: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

pub fn deactivation_message(address: &str, timestamp: i64) -> String {
    format!("Node deactivation request for {} at {}", address, timestamp)
}

pub fn activation_message(address: &str, timestamp: i64) -> String {
    format!("Node activation request for {} at {}", address, timestamp)
}

/// Shared by every wallet task in a cycle
pub struct NodeProcessor {
    api: Arc<dyn NodeApi>,
    identities: Arc<IdentityStore>,
    board: Arc<StatusBoard>,
    proxies: Arc<ProxyPool>,
    timings: Timings,
}

impl NodeProcessor {
    pub fn new(
        api: Arc<dyn NodeApi>,
        identities: Arc<IdentityStore>,
        board: Arc<StatusBoard>,
        proxies: Arc<ProxyPool>,
        timings: Timings,
    ) -> Self {
        Self {
            api,
            identities,
            board,
            proxies,
            timings,
        }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Run attempts until one succeeds or the attempt budget is spent.
    /// Returns true when the wallet ends Active.
    pub async fn process(&self, address: &str) -> bool {
        let max_attempts = self.timings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match self.run_attempt(address).await {
                Ok(()) => return true,
                Err(e) => e,
            };

            attempt += 1;
            self.board.update(
                address,
                NodeState::Error,
                Some(format!("Retry {}/{}: {}", attempt, max_attempts, err)),
            );

            if attempt >= max_attempts {
                error!("Max retries reached for wallet {}", address);
                return false;
            }

            self.board.update(
                address,
                NodeState::Waiting,
                Some(format!("Retrying in {}s...", self.timings.retry_backoff.as_secs())),
            );
            tokio::time::sleep(self.timings.retry_backoff).await;
        }
    }

    /// One pass through stop, check, start, verify and score
    async fn run_attempt(&self, address: &str) -> Result<(), AttemptError> {
        if !self.identities.contains(address) {
            return Err(IdentityError::UnknownAddress(address.to_string()).into());
        }

        self.board.update(address, NodeState::StoppingNode, None);
        self.stop_node(address).await;
        tokio::time::sleep(self.timings.settle).await;

        self.board.update(address, NodeState::CheckingStatus, None);
        let running = self.check_status(address).await?;

        if !running {
            self.board.update(address, NodeState::StartingNode, None);
            self.start_node(address).await?;
            tokio::time::sleep(self.timings.settle).await;
        }

        self.board.update(address, NodeState::VerifyingStatus, None);
        if !self.check_status(address).await? {
            return Err(AttemptError::NotRunning);
        }

        self.board.update(address, NodeState::UpdatingPoints, None);
        let details = self.fetch_points(address).await?;

        let proxy = self.proxies.next().map(str::to_string);
        self.board
            .record_success(address, details.node_points, proxy, details.referral_code);
        Ok(())
    }

    /// Best-effort deactivation. A 404 means the node is already stopped;
    /// any other failure is logged and the sequence carries on.
    async fn stop_node(&self, address: &str) {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let sign = match self
            .identities
            .sign(address, &deactivation_message(address, timestamp))
        {
            Ok(sign) => sign,
            Err(e) => {
                warn!("Node deactivation attempted for {}: {}", address, e);
                return;
            }
        };

        match self.api.stop(address, &ActionRequest { sign, timestamp }).await {
            Ok(true) => debug!("Node deactivated for {}", address),
            Ok(false) => debug!("Node deactivation for {} not acknowledged", address),
            Err(e) if e.status_code() == Some(404) => {
                debug!("Node already stopped for {}", address)
            }
            Err(e) => warn!("Node deactivation attempted for {}: {}", address, e),
        }
    }

    async fn start_node(&self, address: &str) -> Result<(), AttemptError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let sign = self
            .identities
            .sign(address, &activation_message(address, timestamp))
            .map_err(|e| AttemptError::Activation(e.to_string()))?;

        let acknowledged = self
            .api
            .start(address, &ActionRequest { sign, timestamp })
            .await
            .map_err(|e| AttemptError::Activation(e.to_string()))?;

        if !acknowledged {
            warn!("Node activation for {} not acknowledged", address);
        }
        Ok(())
    }

    /// Poll node status until the API answers or polls run out.
    /// Returns whether the node is running.
    async fn check_status(&self, address: &str) -> Result<bool, AttemptError> {
        let attempts = self.timings.poll_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.api.node_status(address).await {
                Ok(start_timestamp) => return Ok(start_timestamp.is_some()),
                Err(e) if attempt >= attempts => return Err(AttemptError::from_status_check(e)),
                Err(e) => {
                    debug!("Status check {}/{} for {} failed: {}", attempt, attempts, address, e);
                    attempt += 1;
                    tokio::time::sleep(self.timings.poll_interval).await;
                }
            }
        }
    }

    async fn fetch_points(&self, address: &str) -> Result<WalletDetails, AttemptError> {
        self.api
            .wallet_details(address)
            .await
            .map_err(AttemptError::from_points)
    }
}

/// Why an attempt failed
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("Connection timeout")]
    StatusTimeout,
    #[error("Node not found")]
    NodeNotFound,
    #[error("Check status failed: {0}")]
    StatusCheck(ApiError),
    #[error("Node not running")]
    NotRunning,
    #[error("Node activation failed: {0}")]
    Activation(String),
    #[error("Internal Server Error")]
    InternalServerError,
    #[error("Gateway Timeout")]
    GatewayTimeout,
    #[error("Node not activated")]
    NotActivated,
    #[error("Update points failed: {0}")]
    Points(ApiError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl AttemptError {
    /// Classify the final failure of a status poll
    fn from_status_check(e: ApiError) -> Self {
        match e {
            ApiError::Timeout(_) => AttemptError::StatusTimeout,
            ApiError::Status { code: 404, .. } => AttemptError::NodeNotFound,
            e => AttemptError::StatusCheck(e),
        }
    }

    fn from_points(e: ApiError) -> Self {
        match e.status_code() {
            Some(500) => AttemptError::InternalServerError,
            Some(504) => AttemptError::GatewayTimeout,
            Some(403) => AttemptError::NotActivated,
            _ => AttemptError::Points(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::status::RecordingSink;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    /// Scripted API: status answers are popped from a queue, the last one repeats
    struct ScriptedApi {
        stop: Result<bool, ApiError>,
        start: Result<bool, ApiError>,
        statuses: Mutex<Vec<Result<Option<i64>, ApiError>>>,
        details: Result<WalletDetails, ApiError>,
        status_calls: AtomicU32,
        start_calls: AtomicU32,
    }

    impl ScriptedApi {
        fn healthy(points: u64) -> Self {
            Self {
                stop: Ok(true),
                start: Ok(true),
                statuses: Mutex::new(vec![Ok(Some(1))]),
                details: Ok(WalletDetails {
                    node_points: points,
                    referral_code: None,
                }),
                status_calls: AtomicU32::new(0),
                start_calls: AtomicU32::new(0),
            }
        }

        fn with_statuses(mut self, statuses: Vec<Result<Option<i64>, ApiError>>) -> Self {
            self.statuses = Mutex::new(statuses.into_iter().rev().collect());
            self
        }
    }

    #[async_trait]
    impl NodeApi for ScriptedApi {
        async fn stop(&self, _: &str, _: &ActionRequest) -> Result<bool, ApiError> {
            self.stop.clone()
        }

        async fn start(&self, _: &str, _: &ActionRequest) -> Result<bool, ApiError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start.clone()
        }

        async fn node_status(&self, _: &str) -> Result<Option<i64>, ApiError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop().unwrap()
            } else {
                statuses[0].clone()
            }
        }

        async fn wallet_details(&self, _: &str) -> Result<WalletDetails, ApiError> {
            self.details.clone()
        }

        async fn verify_referral_code(&self, _: &str) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn dashboard_index(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn build(api: ScriptedApi) -> (NodeProcessor, Arc<ScriptedApi>, RecordingSink) {
        let identities = Arc::new(IdentityStore::load(KEY).unwrap());
        let proxies = Arc::new(ProxyPool::default());
        let sink = RecordingSink::new();
        let board = Arc::new(StatusBoard::new(
            identities.addresses(),
            &proxies,
            Box::new(sink.clone()),
        ));
        let api = Arc::new(api);
        let processor = NodeProcessor::new(
            api.clone(),
            identities,
            board,
            proxies,
            Timings::default(),
        );
        (processor, api, sink)
    }

    fn status_error(code: u16) -> ApiError {
        ApiError::Status {
            code,
            message: String::new(),
        }
    }

    #[test]
    fn action_messages_match_expected_format() {
        assert_eq!(
            deactivation_message("0xabc", 1700000000000),
            "Node deactivation request for 0xabc at 1700000000000"
        );
        assert_eq!(
            activation_message("0xabc", 5),
            "Node activation request for 0xabc at 5"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn running_node_skips_start() {
        let (processor, api, sink) = build(ScriptedApi::healthy(7));
        assert!(processor.process(ADDRESS).await);

        assert_eq!(api.start_calls.load(Ordering::SeqCst), 0);
        let states: Vec<NodeState> = sink.events_for(ADDRESS).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            states,
            vec![
                NodeState::StoppingNode,
                NodeState::CheckingStatus,
                NodeState::VerifyingStatus,
                NodeState::UpdatingPoints,
                NodeState::Active,
            ]
        );
        assert_eq!(processor.board().get(ADDRESS).unwrap().score, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_node_is_started_then_verified() {
        let api = ScriptedApi::healthy(3).with_statuses(vec![Ok(None), Ok(Some(10))]);
        let (processor, api, sink) = build(api);
        assert!(processor.process(ADDRESS).await);

        assert_eq!(api.start_calls.load(Ordering::SeqCst), 1);
        assert!(sink
            .events_for(ADDRESS)
            .iter()
            .any(|(s, _)| *s == NodeState::StartingNode));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_404_is_not_an_error() {
        let mut api = ScriptedApi::healthy(1);
        api.stop = Err(status_error(404));
        let (processor, _, sink) = build(api);

        assert!(processor.process(ADDRESS).await);
        assert!(sink.events_for(ADDRESS).iter().all(|(s, _)| *s != NodeState::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn other_stop_failures_are_swallowed() {
        let mut api = ScriptedApi::healthy(1);
        api.stop = Err(status_error(500));
        let (processor, _, sink) = build(api);

        assert!(processor.process(ADDRESS).await);
        assert!(sink.events_for(ADDRESS).iter().all(|(s, _)| *s != NodeState::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn status_polling_is_bounded_and_spaced() {
        let api = ScriptedApi::healthy(1).with_statuses(vec![Err(ApiError::Timeout("t".into()))]);
        let (processor, api, _) = build(api);

        let started = tokio::time::Instant::now();
        let result = processor.check_status(ADDRESS).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(AttemptError::StatusTimeout)));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 20);
        assert!(elapsed >= Duration::from_secs(2 * 19));
    }

    #[tokio::test(start_paused = true)]
    async fn status_errors_are_classified() {
        let api = ScriptedApi::healthy(1).with_statuses(vec![Err(status_error(404))]);
        let (processor, _, _) = build(api);
        assert!(matches!(
            processor.check_status(ADDRESS).await,
            Err(AttemptError::NodeNotFound)
        ));

        let api = ScriptedApi::healthy(1).with_statuses(vec![Err(ApiError::Network("refused".into()))]);
        let (processor, _, _) = build(api);
        let err = processor.check_status(ADDRESS).await.unwrap_err();
        assert!(err.to_string().starts_with("Check status failed:"));
    }

    #[tokio::test(start_paused = true)]
    async fn status_recovers_before_polls_run_out() {
        let api = ScriptedApi::healthy(1).with_statuses(vec![
            Err(ApiError::Timeout("t".into())),
            Err(ApiError::Timeout("t".into())),
            Ok(Some(5)),
        ]);
        let (processor, api, _) = build(api);
        assert!(processor.check_status(ADDRESS).await.unwrap());
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn points_status_codes_map_to_messages() {
        for (code, expected) in [
            (500, "Internal Server Error"),
            (504, "Gateway Timeout"),
            (403, "Node not activated"),
        ] {
            assert_eq!(AttemptError::from_points(status_error(code)).to_string(), expected);
        }
        let other = AttemptError::from_points(status_error(418)).to_string();
        assert!(other.starts_with("Update points failed:"));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failed_attempts_leave_wallet_in_error() {
        let mut api = ScriptedApi::healthy(1);
        api.details = Err(status_error(403));
        let (processor, _, sink) = build(api);

        assert!(!processor.process(ADDRESS).await);

        let events = sink.events_for(ADDRESS);
        let errors: Vec<&Option<String>> = events
            .iter()
            .filter(|(s, _)| *s == NodeState::Error)
            .map(|(_, m)| m)
            .collect();
        assert_eq!(errors.len(), 5);
        assert_eq!(errors[4].as_deref(), Some("Retry 5/5: Node not activated"));
        assert_eq!(
            events.iter().filter(|(s, _)| *s == NodeState::StoppingNode).count(),
            5
        );
        // no backoff after the final failure
        assert_eq!(events.iter().filter(|(s, _)| *s == NodeState::Waiting).count(), 4);

        let status = processor.board().get(ADDRESS).unwrap();
        assert_eq!(status.state, NodeState::Error);
        assert_eq!(status.last_error.as_deref(), Some("Retry 5/5: Node not activated"));
    }

    #[tokio::test(start_paused = true)]
    async fn node_not_running_after_start_fails_attempt() {
        let api = ScriptedApi::healthy(1).with_statuses(vec![Ok(None)]);
        let (processor, _, _) = build(api);
        let err = processor.run_attempt(ADDRESS).await.unwrap_err();
        assert!(matches!(err, AttemptError::NotRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_fails_attempt() {
        let mut api = ScriptedApi::healthy(1).with_statuses(vec![Ok(None)]);
        api.start = Err(ApiError::Network("reset".into()));
        let (processor, _, _) = build(api);
        let err = processor.run_attempt(ADDRESS).await.unwrap_err();
        assert!(err.to_string().starts_with("Node activation failed:"));
    }
}
