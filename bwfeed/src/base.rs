// bwfeed/src/base.rs
// Base error definitions for the feed adapter

use thiserror::Error;


/// Errors that can occur while talking to the feed.
///
/// `NotConnected`, `DuplicateRequestId` and `InvalidParameter` are returned directly from
/// the call that caused them. `RequestTimedOut`, `ConnectionLost` and `ConnectionFailed`
/// only ever travel through the observer channels of the `EventDispatcher`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to the feed")]
  NotConnected,

  #[error("Connection lost")]
  ConnectionLost,

  #[error("Service already running: {0}")]
  AlreadyRunning(String),

  #[error("Transport error: {0}")]
  TransportError(String),

  #[error("Parse error: {0}")]
  ParseError(String),

  #[error("Request timed out: {0}")]
  RequestTimedOut(String),

  #[error("Duplicate request ID: {0}")]
  DuplicateRequestId(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),
}
