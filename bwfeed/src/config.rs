// bwfeed/src/config.rs
//! Connection parameters and client settings.
//!
//! Parameters are normally loaded once at startup from an XML file shaped like:
//!
//! ```xml
//! <BlackwoodParameters>
//!   <UserName>35TEST</UserName>
//!   <Password>123456</Password>
//!   <Ip>72.5.42.156</Ip>
//!   <Port>5000</Port>
//!   <ClientPort>5300</ClientPort>
//! </BlackwoodParameters>
//! ```

use crate::base::FeedError;
use log::{debug, info};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;


/// How to reach the feed. Validated on construction, never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
  user_name: String,
  password: String,
  ip: String,
  port: u16,
  client_port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParametersFile {
  user_name: String,
  password: String,
  ip: String,
  port: u32,
  client_port: u32,
}

fn checked_port(name: &str, value: u32) -> Result<u16, FeedError> {
  match u16::try_from(value) {
    Ok(port) if port > 0 => Ok(port),
    _ => Err(FeedError::ConfigurationError(format!("{} must be within 1..=65535, got {}", name, value))),
  }
}

impl ConnectionParameters {
  pub fn new(user_name: &str, password: &str, ip: &str, port: u32, client_port: u32) -> Result<Self, FeedError> {
    if user_name.trim().is_empty() {
      return Err(FeedError::ConfigurationError("UserName must not be empty".to_string()));
    }
    if password.is_empty() {
      return Err(FeedError::ConfigurationError("Password must not be empty".to_string()));
    }
    if ip.trim().is_empty() {
      return Err(FeedError::ConfigurationError("Ip must not be empty".to_string()));
    }
    Ok(ConnectionParameters {
      user_name: user_name.trim().to_string(),
      password: password.to_string(),
      ip: ip.trim().to_string(),
      port: checked_port("Port", port)?,
      client_port: checked_port("ClientPort", client_port)?,
    })
  }

  /// Parses and validates a parameter document.
  pub fn from_xml_str(xml: &str) -> Result<Self, FeedError> {
    let file: ParametersFile = quick_xml::de::from_str(xml)
      .map_err(|e| FeedError::ConfigurationError(format!("Invalid parameter file: {}", e)))?;
    debug!("Parsed parameter file for user '{}'", file.user_name);
    Self::new(&file.user_name, &file.password, &file.ip, file.port, file.client_port)
  }

  /// Reads a parameter file from disk.
  pub fn from_xml_file<P: AsRef<Path>>(path: P) -> Result<Self, FeedError> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path)
      .map_err(|e| FeedError::ConfigurationError(format!("Reading {}: {}", path.display(), e)))?;
    let params = Self::from_xml_str(&xml)?;
    info!("Loaded connection parameters from {}: {:?}", path.display(), params);
    Ok(params)
  }

  pub fn user_name(&self) -> &str { &self.user_name }
  pub fn password(&self) -> &str { &self.password }
  pub fn ip(&self) -> &str { &self.ip }
  pub fn port(&self) -> u16 { self.port }
  pub fn client_port(&self) -> u16 { self.client_port }

  /// `ip:port` of the feed server.
  pub fn server_address(&self) -> String {
    format!("{}:{}", self.ip, self.port)
  }
}

impl fmt::Debug for ConnectionParameters {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConnectionParameters")
      .field("user_name", &self.user_name)
      .field("password", &"***")
      .field("ip", &self.ip)
      .field("port", &self.port)
      .field("client_port", &self.client_port)
      .finish()
  }
}

/// Settings of the adapter itself (as opposed to how to reach the feed).
#[derive(Clone, Debug)]
pub struct ClientConfig {
  /// Name reported to logon/logout observers when the transport does not supply one.
  pub provider_name: String,
  /// How long a historical request may stay unanswered (default: 120s)
  pub request_timeout: Duration,
  /// How long `stop()` waits for the logout event before tearing the session down (default: 10s)
  pub logout_timeout: Duration,
  /// Period of the deadline-checking thread (default: 100ms)
  pub housekeeping_interval: Duration,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      provider_name: "Blackwood".to_string(),
      request_timeout: Duration::from_secs(120),
      logout_timeout: Duration::from_secs(10),
      housekeeping_interval: Duration::from_millis(100),
    }
  }
}
