// bwfeed/src/conn_mock.rs
//! In-process stand-in for the feed.
//!
//! `ScriptedTransport` records every outbound call and answers the way a well-behaved
//! feed would, as configured by [`ScriptedBehavior`]: logon after connect, logout after
//! disconnect, a tick after each subscription and synthetic bars for each historical
//! request. Events can also be injected by hand with the `emit_*` methods, which is how
//! tests reproduce late, duplicate and unsolicited traffic.
//!
//! Responses are delivered synchronously on the calling thread, after the internal lock
//! has been released, so handlers are free to call back into the transport.

use crate::base::FeedError;
use crate::config::ConnectionParameters;
use crate::conn::Transport;
use crate::data::{Bar, BarType, HistoricDataRequest, Security, Tick};
use crate::handler::MessageHandler;

use chrono::{Duration as ChronoDuration, Months, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

const MAX_SYNTHETIC_BARS: usize = 1000;

/// An outbound call recorded by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SentRequest {
  Connect { server: String, user_name: String },
  Disconnect,
  TickSubscription(Security),
  TickUnsubscription(Security),
  HistoricalRequest(HistoricDataRequest),
}

#[derive(Debug, Clone)]
pub struct ScriptedBehavior {
  /// Name reported in logon/logout events.
  pub provider_name: String,
  pub logon_on_connect: bool,
  pub logout_on_disconnect: bool,
  /// Makes `connect` fail with this message.
  pub fail_connect: Option<String>,
  /// Price of the tick sent back after each subscription. None sends nothing.
  pub tick_on_subscribe: Option<f64>,
  pub answer_history: bool,
  /// Splits history answers into chunks of this many bars (the last one final).
  pub history_chunk_size: Option<usize>,
}

impl Default for ScriptedBehavior {
  fn default() -> Self {
    Self {
      provider_name: "Blackwood".to_string(),
      logon_on_connect: true,
      logout_on_disconnect: true,
      fail_connect: None,
      tick_on_subscribe: Some(10.5),
      answer_history: true,
      history_chunk_size: None,
    }
  }
}

impl ScriptedBehavior {
  /// A feed that never answers on its own; every event must be emitted by hand.
  pub fn silent() -> Self {
    Self {
      logon_on_connect: false,
      logout_on_disconnect: false,
      tick_on_subscribe: None,
      answer_history: false,
      ..Self::default()
    }
  }
}

struct ScriptedState {
  behavior: ScriptedBehavior,
  handler: Option<MessageHandler>,
  connected: bool,
  sent: Vec<SentRequest>,
}

#[derive(Clone)]
pub struct ScriptedTransport {
  inner: Arc<Mutex<ScriptedState>>,
}

impl ScriptedTransport {
  pub fn new(behavior: ScriptedBehavior) -> Self {
    ScriptedTransport {
      inner: Arc::new(Mutex::new(ScriptedState {
        behavior,
        handler: None,
        connected: false,
        sent: Vec::new(),
      })),
    }
  }

  pub fn set_behavior(&self, behavior: ScriptedBehavior) {
    self.inner.lock().behavior = behavior;
  }

  /// Everything sent so far, in order.
  pub fn sent(&self) -> Vec<SentRequest> {
    self.inner.lock().sent.clone()
  }

  pub fn is_connected(&self) -> bool {
    self.inner.lock().connected
  }

  fn handler(&self) -> Option<MessageHandler> {
    let handler = self.inner.lock().handler.clone();
    if handler.is_none() {
      log::warn!("Scripted transport: no handler installed; event dropped");
    }
    handler
  }

  fn provider_name(&self) -> String {
    self.inner.lock().behavior.provider_name.clone()
  }

  pub fn emit_logon(&self) {
    let provider = self.provider_name();
    if let Some(h) = self.handler() {
      h.logon(&provider);
    }
  }

  pub fn emit_logout(&self) {
    let provider = self.provider_name();
    self.inner.lock().connected = false;
    if let Some(h) = self.handler() {
      h.logout(&provider);
    }
  }

  pub fn emit_tick(&self, tick: &Tick) {
    if let Some(h) = self.handler() {
      h.tick(tick);
    }
  }

  pub fn emit_historical_bar_data(&self, request_id: &str, bars: &[Bar], is_final: bool) {
    if let Some(h) = self.handler() {
      h.historical_bar_data(request_id, bars, is_final);
    }
  }

  fn record(&self, request: SentRequest) -> Result<ScriptedBehavior, FeedError> {
    let mut state = self.inner.lock();
    let needs_session = !matches!(request, SentRequest::Connect { .. } | SentRequest::Disconnect);
    if needs_session && !state.connected {
      return Err(FeedError::TransportError(format!("not connected; cannot send {:?}", request)));
    }
    log::debug!("Scripted transport: {:?}", request);
    state.sent.push(request);
    Ok(state.behavior.clone())
  }
}

impl Transport for ScriptedTransport {
  fn connect(&self, params: &ConnectionParameters) -> Result<(), FeedError> {
    let behavior = self.record(SentRequest::Connect {
      server: params.server_address(),
      user_name: params.user_name().to_string(),
    })?;
    if let Some(reason) = behavior.fail_connect {
      return Err(FeedError::ConnectionFailed(reason));
    }
    self.inner.lock().connected = true;
    if behavior.logon_on_connect {
      self.emit_logon();
    }
    Ok(())
  }

  fn disconnect(&self) -> Result<(), FeedError> {
    let behavior = self.record(SentRequest::Disconnect)?;
    self.inner.lock().connected = false;
    if behavior.logout_on_disconnect {
      self.emit_logout();
    }
    Ok(())
  }

  fn send_tick_subscription(&self, security: &Security) -> Result<(), FeedError> {
    let behavior = self.record(SentRequest::TickSubscription(security.clone()))?;
    if let Some(price) = behavior.tick_on_subscribe {
      self.emit_tick(&Tick::trade(security.clone(), Utc::now(), price, 100.0));
    }
    Ok(())
  }

  fn send_tick_unsubscription(&self, security: &Security) -> Result<(), FeedError> {
    self.record(SentRequest::TickUnsubscription(security.clone()))?;
    Ok(())
  }

  fn send_historical_request(&self, request: &HistoricDataRequest) -> Result<(), FeedError> {
    let behavior = self.record(SentRequest::HistoricalRequest(request.clone()))?;
    if !behavior.answer_history {
      return Ok(());
    }
    let bars = synthetic_bars(request);
    match behavior.history_chunk_size {
      Some(size) if size > 0 && bars.len() > size => {
        let chunks: Vec<&[Bar]> = bars.chunks(size).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
          self.emit_historical_bar_data(&request.id, chunk, i == last);
        }
      }
      _ => self.emit_historical_bar_data(&request.id, &bars, true),
    }
    Ok(())
  }

  fn set_message_handler(&self, handler: MessageHandler) {
    let mut state = self.inner.lock();
    if state.handler.is_some() {
      log::warn!("Scripted transport: replacing existing message handler.");
    }
    state.handler = Some(handler);
  }
}

/// Deterministic bars covering the request's range, one per `interval` units of the bar
/// type (minutes for intraday). Capped at a thousand bars.
pub fn synthetic_bars(request: &HistoricDataRequest) -> Vec<Bar> {
  let step = request.interval.max(1);
  let mut bars = Vec::new();
  let mut time = request.start_time;
  let mut price = 100.0;
  while time <= request.end_time && bars.len() < MAX_SYNTHETIC_BARS {
    bars.push(Bar {
      time,
      open: price,
      high: price + 1.0,
      low: price - 1.0,
      close: price + 0.5,
      volume: 1_000 + bars.len() as i64,
    });
    price += 0.5;
    let next = match request.bar_type {
      BarType::Daily => time.checked_add_signed(ChronoDuration::days(step as i64)),
      BarType::Intraday => time.checked_add_signed(ChronoDuration::minutes(step as i64)),
      BarType::Monthly => time.checked_add_months(Months::new(step)),
    };
    match next {
      Some(t) => time = t,
      None => break,
    }
  }
  bars
}
