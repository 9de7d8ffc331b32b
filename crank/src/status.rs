//! Per-wallet status board
//!
//! The key set is fixed when the board is built. Each entry has its own lock
//! and is only ever written by the task processing that wallet, so wallets
//! never contend with each other.

use crossterm::style::{StyledContent, Stylize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::proxy::ProxyPool;

/// Where a wallet is in its stop/start/score sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Initial state before the first cycle touches the wallet
    Starting,
    StoppingNode,
    CheckingStatus,
    StartingNode,
    /// Second status check, confirming the node is running
    VerifyingStatus,
    UpdatingPoints,
    Active,
    /// Backing off before the next attempt
    Waiting,
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Starting => write!(f, "Starting"),
            NodeState::StoppingNode => write!(f, "Stopping Node"),
            NodeState::CheckingStatus => write!(f, "Checking Status"),
            NodeState::StartingNode => write!(f, "Starting Node"),
            NodeState::VerifyingStatus => write!(f, "Verifying Status"),
            NodeState::UpdatingPoints => write!(f, "Updating Points"),
            NodeState::Active => write!(f, "Active"),
            NodeState::Waiting => write!(f, "Waiting"),
            NodeState::Error => write!(f, "Error"),
        }
    }
}

impl NodeState {
    fn styled(self) -> StyledContent<String> {
        let label = self.to_string();
        match self {
            NodeState::Active => label.green(),
            NodeState::Error => label.red(),
            NodeState::StoppingNode
            | NodeState::CheckingStatus
            | NodeState::StartingNode
            | NodeState::VerifyingStatus
            | NodeState::UpdatingPoints => label.cyan(),
            NodeState::Waiting => label.yellow(),
            NodeState::Starting => label.stylize(),
        }
    }
}

/// Current view of one wallet
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub state: NodeState,
    /// Last observed score; the remote side is not known to be monotonic
    pub score: u64,
    /// Message attached to the latest transition
    pub message: Option<String>,
    pub last_error: Option<String>,
    pub proxy: Option<String>,
    pub referral_code: Option<String>,
}

impl NodeStatus {
    fn new(proxy: Option<String>) -> Self {
        Self {
            state: NodeState::Starting,
            score: 0,
            message: None,
            last_error: None,
            proxy,
            referral_code: None,
        }
    }
}

/// Renders state transitions
pub trait StatusSink: Send + Sync {
    fn transition(&self, address: &str, state: NodeState, message: Option<&str>);
}

/// `[12:00:00] Wallet 0xf39F...2266: Active - Points: 10 | Proxy: none`
pub struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn transition(&self, address: &str, state: NodeState, message: Option<&str>) {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        let line = format!("[{}] Wallet {}: {}", timestamp, short_address(address), state.styled());
        match message {
            Some(message) if state == NodeState::Error => {
                println!("{} - {}", line, message.to_string().red())
            }
            Some(message) => println!("{} - {}", line, message),
            None => println!("{}", line),
        }
    }
}

/// Keeps every transition in memory
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(String, NodeState, Option<String>)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, NodeState, Option<String>)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Transitions for a single wallet, in order
    pub fn events_for(&self, address: &str) -> Vec<(NodeState, Option<String>)> {
        self.events()
            .into_iter()
            .filter(|(a, _, _)| a == address)
            .map(|(_, state, message)| (state, message))
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn transition(&self, address: &str, state: NodeState, message: Option<&str>) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((address.to_string(), state, message.map(str::to_string)));
    }
}

pub fn short_address(address: &str) -> String {
    if address.len() <= 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

/// Address -> status map with a fixed key set
pub struct StatusBoard {
    entries: HashMap<String, Mutex<NodeStatus>>,
    sink: Box<dyn StatusSink>,
}

impl StatusBoard {
    /// One entry per address, each with an initially sampled proxy
    pub fn new(addresses: &[String], proxies: &ProxyPool, sink: Box<dyn StatusSink>) -> Self {
        let entries = addresses
            .iter()
            .map(|address| {
                let proxy = proxies.next().map(str::to_string);
                (address.clone(), Mutex::new(NodeStatus::new(proxy)))
            })
            .collect();
        Self { entries, sink }
    }

    fn with_entry(&self, address: &str, f: impl FnOnce(&mut NodeStatus)) {
        if let Some(entry) = self.entries.get(address) {
            f(&mut entry.lock().unwrap_or_else(|e| e.into_inner()));
        }
    }

    /// Record a transition and render it
    pub fn update(&self, address: &str, state: NodeState, message: Option<String>) {
        self.with_entry(address, |status| {
            status.state = state;
            if state == NodeState::Error {
                status.last_error = message.clone();
            }
            status.message = message.clone();
        });
        self.sink.transition(address, state, message.as_deref());
    }

    /// Mark a wallet Active with its freshly fetched score
    pub fn record_success(
        &self,
        address: &str,
        score: u64,
        proxy: Option<String>,
        referral_code: Option<String>,
    ) {
        let message = format!(
            "Points: {} | Proxy: {}",
            score,
            proxy.as_deref().unwrap_or("none")
        );
        self.with_entry(address, |status| {
            status.score = score;
            status.proxy = proxy;
            if referral_code.is_some() {
                status.referral_code = referral_code;
            }
            status.last_error = None;
        });
        self.update(address, NodeState::Active, Some(message));
    }

    pub fn get(&self, address: &str) -> Option<NodeStatus> {
        self.entries
            .get(address)
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of wallets currently in `state`
    pub fn count(&self, state: NodeState) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).state == state)
            .count()
    }
}
