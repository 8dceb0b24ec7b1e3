// bwfeed/src/data.rs
// Value types exchanged with the feed: securities, ticks, bars and history requests.

use crate::base::FeedError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;


/// A tradable instrument. Two securities are the same security when their symbols match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Security {
  pub symbol: String,
}

impl Security {
  pub fn new(symbol: &str) -> Self {
    Security { symbol: symbol.to_string() }
  }
}

impl fmt::Display for Security {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.symbol)
  }
}

/// Request to start (or stop) streaming ticks for one security.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
  pub security: Security,
}

impl Subscribe {
  pub fn new(symbol: &str) -> Self {
    Subscribe { security: Security::new(symbol) }
  }
}

/// A single market update for one security.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
  pub security: Security,
  pub time: DateTime<Utc>,
  pub last_price: f64,
  pub last_size: f64,
  pub bid_price: Option<f64>,
  pub ask_price: Option<f64>,
}

impl Tick {
  /// Trade tick without quote information.
  pub fn trade(security: Security, time: DateTime<Utc>, price: f64, size: f64) -> Self {
    Tick {
      security,
      time,
      last_price: price,
      last_size: size,
      bid_price: None,
      ask_price: None,
    }
  }
}

/// Aggregation period of a historical bar request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarType {
  Daily,
  Intraday,
  Monthly,
}

impl fmt::Display for BarType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BarType::Daily => "DAILY",
      BarType::Intraday => "INTRADAY",
      BarType::Monthly => "MONTHLY",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for BarType {
  type Err = FeedError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "DAILY" => Ok(BarType::Daily),
      "INTRADAY" => Ok(BarType::Intraday),
      "MONTHLY" => Ok(BarType::Monthly),
      _ => Err(FeedError::ParseError(format!("Unknown bar type: {}", s))),
    }
  }
}

/// One aggregated price summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
  pub time: DateTime<Utc>,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: i64,
}

/// A caller-built request for historical bars.
///
/// The `id` is chosen by the caller and must be unique among the requests that are
/// currently in flight. `interval` is expressed in minutes for intraday bars and in
/// periods (days, months) otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricDataRequest {
  pub id: String,
  pub security: Security,
  pub bar_type: BarType,
  pub interval: u32,
  pub start_time: DateTime<Utc>,
  pub end_time: DateTime<Utc>,
}

impl HistoricDataRequest {
  pub fn new(
    id: &str,
    security: Security,
    bar_type: BarType,
    interval: u32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
  ) -> Self {
    HistoricDataRequest {
      id: id.to_string(),
      security,
      bar_type,
      interval,
      start_time,
      end_time,
    }
  }

  /// Checks the request before it is handed to the transport.
  pub fn validate(&self) -> Result<(), FeedError> {
    if self.id.trim().is_empty() {
      return Err(FeedError::InvalidParameter("Historical request id must not be empty".to_string()));
    }
    if self.security.symbol.trim().is_empty() {
      return Err(FeedError::InvalidParameter(format!("Request {} has an empty symbol", self.id)));
    }
    if self.interval == 0 {
      return Err(FeedError::InvalidParameter(format!("Request {} has a zero interval", self.id)));
    }
    if self.start_time > self.end_time {
      return Err(FeedError::InvalidParameter(format!(
        "Request {} starts ({}) after it ends ({})", self.id, self.start_time, self.end_time
      )));
    }
    Ok(())
  }
}

/// The bars answering one historical request.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricBarData {
  pub request_id: String,
  pub security: Security,
  pub bar_type: BarType,
  pub bars: Vec<Bar>,
}

/// Asynchronous failure of a historical request (timeout or lost session).
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFailure {
  pub request_id: String,
  pub security: Security,
  pub error: FeedError,
}
