// bwfeed/src/lib.rs
// Main entry point for the feed adapter library

//! # bwfeed
//!
//! Client adapter for the Blackwood market data feed:
//!
//! - Session lifecycle (logon/logout) with a well-defined state machine
//! - Live tick subscriptions multiplexed over one session
//! - Historical bar requests correlated by caller-chosen id, with timeouts
//! - Observer channels for every asynchronous outcome
//!
//! The physical connection is supplied by the caller as a [`conn::Transport`];
//! [`conn_mock::ScriptedTransport`] is an in-process stand-in for tests and demos.

mod base;
pub mod config;
pub mod conn;
pub mod conn_mock;
pub mod data;
pub mod dispatcher;
pub mod handler;
pub mod session;
pub mod subscription;
pub mod historical;
pub mod client;

pub use base::FeedError;
pub use client::FeedClient;
pub use config::{ClientConfig, ConnectionParameters};
pub use data::{Bar, BarType, HistoricBarData, HistoricDataRequest, RequestFailure, Security, Subscribe, Tick};
pub use dispatcher::{EventChannel, ObserverId, ObserverResult};
pub use session::SessionState;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
