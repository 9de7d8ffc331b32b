//! HTTP clients for the node APIs
//!
//! Two profiles share one request path: the dashboard API and the worker
//! API that executes node actions. The proxy is chosen by the caller for
//! every request, so consecutive calls for one wallet can leave through
//! different proxies.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::proxy::{self, ProxyPool};

pub const DEFAULT_DASHBOARD_URL: &str = "https://dashboard.layeredge.io/api";
pub const DEFAULT_API_URL: &str = "https://referralapi.layeredge.io/api";

/// Message the worker API returns when a start/stop was accepted
pub const ACTION_SUCCESS_MESSAGE: &str = "node action executed successfully";

const DASHBOARD_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "en-GB,en;q=0.9,en-US;q=0.8"),
    ("content-type", "application/json"),
    ("origin", "https://dashboard.layeredge.io"),
    ("referer", "https://dashboard.layeredge.io/"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
    ),
];

const WORKER_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-language", "en-US,en;q=0.9"),
    ("content-type", "application/json"),
    ("origin", "https://dashboard.layeredge.io"),
    ("referer", "https://dashboard.layeredge.io"),
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    ),
];

/// Base URL, headers and transport retry policy for one API
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub base_url: String,
    pub headers: &'static [(&'static str, &'static str)],
    pub timeout: Duration,
    /// Extra attempts after a timeout or connection failure (never after an HTTP status)
    pub transport_retries: u32,
    pub retry_delay: Duration,
}

impl ClientProfile {
    pub fn dashboard(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            headers: DASHBOARD_HEADERS,
            timeout,
            transport_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn worker(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            headers: WORKER_HEADERS,
            timeout,
            transport_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }

    fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &(name, value) in self.headers {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        headers
    }
}

/// JSON client bound to one profile
pub struct RemoteClient {
    profile: ClientProfile,
}

impl RemoteClient {
    pub fn new(profile: ClientProfile) -> Self {
        Self { profile }
    }

    /// Build an HTTP client that exits through `proxy`, or directly when None
    fn build_client(&self, proxy: Option<&str>) -> Result<reqwest::Client, ApiError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.profile.timeout)
            .default_headers(self.profile.header_map());

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy::normalize(proxy))
                .map_err(|e| ApiError::Proxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(|e| ApiError::Network(e.to_string()))
    }

    /// Send a request and decode the JSON body.
    ///
    /// Timeouts and connection failures are retried up to the profile's
    /// allowance. Non-2xx responses are returned as `ApiError::Status`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        proxy: Option<&str>,
    ) -> Result<Value, ApiError> {
        let client = self.build_client(proxy)?;
        let url = format!("{}{}", self.profile.base_url.trim_end_matches('/'), path);

        let mut attempt = 0;
        loop {
            match Self::send_once(&client, method.clone(), &url, body).await {
                Err(e) if e.is_transient() && attempt < self.profile.transport_retries => {
                    attempt += 1;
                    debug!("{} {} failed ({}), transport retry {}", method, url, e, attempt);
                    tokio::time::sleep(self.profile.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn send_once(
        client: &reqwest::Client,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut request = client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|json| json["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(ApiError::Status {
                code: status.as_u16(),
                message,
            });
        }

        response.json::<Value>().await.map_err(ApiError::from_reqwest)
    }
}

/// Signed body for start/stop actions
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub sign: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeStatusData {
    start_timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VerifyCodeData {
    valid: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletDetailsData {
    node_points: Option<f64>,
    referral_code: Option<String>,
}

/// Score and referral info for one wallet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletDetails {
    pub node_points: u64,
    pub referral_code: Option<String>,
}

/// Remote operations used by the node processor and the subcommands
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Deactivate the node. `Ok(true)` when the API reports success.
    async fn stop(&self, address: &str, request: &ActionRequest) -> Result<bool, ApiError>;

    /// Activate the node. `Ok(true)` when the API reports success.
    async fn start(&self, address: &str, request: &ActionRequest) -> Result<bool, ApiError>;

    /// The node's start timestamp, None when it is not running
    async fn node_status(&self, address: &str) -> Result<Option<i64>, ApiError>;

    async fn wallet_details(&self, address: &str) -> Result<WalletDetails, ApiError>;

    /// Whether the referral API accepts `code` as an invite code
    async fn verify_referral_code(&self, code: &str) -> Result<bool, ApiError>;

    /// Plain GET on the dashboard root, used for reachability checks
    async fn dashboard_index(&self) -> Result<(), ApiError>;
}

/// `NodeApi` over HTTP, sampling a fresh proxy for every call
pub struct HttpNodeApi {
    worker: RemoteClient,
    dashboard: RemoteClient,
    proxies: Arc<ProxyPool>,
}

impl HttpNodeApi {
    pub fn new(worker: ClientProfile, dashboard: ClientProfile, proxies: Arc<ProxyPool>) -> Self {
        Self {
            worker: RemoteClient::new(worker),
            dashboard: RemoteClient::new(dashboard),
            proxies,
        }
    }

    async fn worker_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        self.worker.request(method, path, body, self.proxies.next()).await
    }

    async fn action(
        &self,
        address: &str,
        action: &str,
        request: &ActionRequest,
    ) -> Result<bool, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::Decode(e.to_string()))?;
        let path = format!("/light-node/node-action/{}/{}", address, action);
        let json = self.worker_request(Method::POST, &path, Some(&body)).await?;
        let response: ActionResponse =
            serde_json::from_value(json).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(response.message.as_deref() == Some(ACTION_SUCCESS_MESSAGE))
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn stop(&self, address: &str, request: &ActionRequest) -> Result<bool, ApiError> {
        self.action(address, "stop", request).await
    }

    async fn start(&self, address: &str, request: &ActionRequest) -> Result<bool, ApiError> {
        self.action(address, "start", request).await
    }

    async fn node_status(&self, address: &str) -> Result<Option<i64>, ApiError> {
        let path = format!("/light-node/node-status/{}", address);
        let json = self.worker_request(Method::GET, &path, None).await?;
        let envelope: Envelope<NodeStatusData> =
            serde_json::from_value(json).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(envelope.data.and_then(|d| d.start_timestamp))
    }

    async fn wallet_details(&self, address: &str) -> Result<WalletDetails, ApiError> {
        let path = format!("/referral/wallet-details/{}", address);
        let json = self.worker_request(Method::GET, &path, None).await?;
        let envelope: Envelope<WalletDetailsData> =
            serde_json::from_value(json).map_err(|e| ApiError::Decode(e.to_string()))?;

        let Some(data) = envelope.data else {
            warn!("Wallet details for {} had no data", address);
            return Ok(WalletDetails::default());
        };

        Ok(WalletDetails {
            node_points: data.node_points.unwrap_or(0.0).max(0.0) as u64,
            referral_code: data.referral_code,
        })
    }

    async fn verify_referral_code(&self, code: &str) -> Result<bool, ApiError> {
        let body = serde_json::json!({ "invite_code": code });
        let json = self
            .worker_request(Method::POST, "/referral/verify-referral-code", Some(&body))
            .await?;
        let envelope: Envelope<VerifyCodeData> =
            serde_json::from_value(json).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(envelope.data.and_then(|d| d.valid).unwrap_or(false))
    }

    async fn dashboard_index(&self) -> Result<(), ApiError> {
        self.dashboard
            .request(Method::GET, "/", None, self.proxies.next())
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid proxy: {0}")]
    Proxy(String),
    #[error("Request failed with status code {code}: {message}")]
    Status { code: u16, message: String },
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }

    /// Timeouts and connection failures
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout(_) | ApiError::Network(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}
