// bwfeed/src/handler.rs
// Handlers for events decoded by the transport.
use std::sync::{Arc, Weak};
use log::trace;
use crate::data::{Bar, Tick};


/// Session lifecycle: logon and logout of the feed session.
pub trait SessionHandler: Send + Sync {
  /// The feed accepted the logon. `provider` names the feed that answered.
  fn logon(&self, provider: &str);

  /// The feed session ended, either on request or because the feed dropped it.
  fn logout(&self, provider: &str);
}

/// Streaming market data.
pub trait MarketDataHandler: Send + Sync {
  fn tick(&self, tick: &Tick);
}

/// Responses to historical bar requests.
pub trait HistoricalDataHandler: Send + Sync {
  /// Bars for `request_id`. `is_final` is false when the feed announces that more
  /// chunks follow for the same request.
  fn historical_bar_data(&self, request_id: &str, bars: &[Bar], is_final: bool);
}

/// The bundle of handlers a transport calls into. Cheap to clone.
///
/// Holds weak references: a transport that outlives the client simply stops delivering.
#[derive(Clone)]
pub struct MessageHandler {
  session: Weak<dyn SessionHandler>,
  market_data: Weak<dyn MarketDataHandler>,
  historical: Weak<dyn HistoricalDataHandler>,
}

impl MessageHandler {
  pub fn new<S, M, H>(session: &Arc<S>, market_data: &Arc<M>, historical: &Arc<H>) -> Self
  where
    S: SessionHandler + 'static,
    M: MarketDataHandler + 'static,
    H: HistoricalDataHandler + 'static,
  {
    let session: Weak<S> = Arc::downgrade(session);
    let market_data: Weak<M> = Arc::downgrade(market_data);
    let historical: Weak<H> = Arc::downgrade(historical);
    MessageHandler { session, market_data, historical }
  }

  pub fn logon(&self, provider: &str) {
    match self.session.upgrade() {
      Some(h) => h.logon(provider),
      None => trace!("Logon from {} after client shutdown; dropped", provider),
    }
  }

  pub fn logout(&self, provider: &str) {
    match self.session.upgrade() {
      Some(h) => h.logout(provider),
      None => trace!("Logout from {} after client shutdown; dropped", provider),
    }
  }

  pub fn tick(&self, tick: &Tick) {
    if let Some(h) = self.market_data.upgrade() {
      h.tick(tick);
    }
  }

  pub fn historical_bar_data(&self, request_id: &str, bars: &[Bar], is_final: bool) {
    if let Some(h) = self.historical.upgrade() {
      h.historical_bar_data(request_id, bars, is_final);
    }
  }
}
