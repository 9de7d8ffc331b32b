//! Light Node Crank
//!
//! Keeps a fleet of light nodes alive: every cycle each wallet's node is
//! stopped, checked, restarted if needed, verified and its points recorded.

pub mod client;
pub mod commands;
pub mod config;
pub mod identity;
pub mod processor;
pub mod proxy;
pub mod scheduler;
pub mod status;

pub use client::{ApiError, ClientProfile, HttpNodeApi, NodeApi, WalletDetails};
pub use identity::{IdentityError, IdentityStore};
pub use processor::{AttemptError, NodeProcessor, Timings};
pub use proxy::ProxyPool;
pub use scheduler::{CycleScheduler, CycleSummary};
pub use status::{NodeState, NodeStatus, StatusBoard};
