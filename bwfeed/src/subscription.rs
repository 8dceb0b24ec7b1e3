// bwfeed/src/subscription.rs
use crate::base::FeedError;
use crate::conn::MessageBroker;
use crate::data::{Security, Tick};
use crate::dispatcher::EventDispatcher;
use crate::handler::MarketDataHandler;
use crate::session::{SessionState, SharedState};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Registration {
  // Subscription sends still waiting on the transport.
  pending: usize,
  // At least one send for this registration reached the transport.
  confirmed: bool,
}

/// Tracks the securities with a live tick subscription and routes their ticks.
pub struct SubscriptionRegistry {
  message_broker: Arc<MessageBroker>,
  state: SharedState,
  dispatcher: Arc<EventDispatcher>,
  subscriptions: Mutex<BTreeMap<Security, Registration>>,
}

impl SubscriptionRegistry {
  pub(crate) fn new(message_broker: Arc<MessageBroker>, state: SharedState, dispatcher: Arc<EventDispatcher>) -> Arc<Self> {
    Arc::new(SubscriptionRegistry {
      message_broker,
      state,
      dispatcher,
      subscriptions: Mutex::new(BTreeMap::new()),
    })
  }

  /// Starts streaming ticks for `security`.
  ///
  /// Fails with `NotConnected` unless the session is connected, in which case nothing is
  /// sent. Subscribing twice sends the request again but keeps a single registration.
  /// Returns once the request is handed to the transport; ticks follow asynchronously.
  pub fn subscribe(&self, security: &Security) -> Result<(), FeedError> {
    let newly_added = {
      let state = self.state.read();
      if *state != SessionState::Connected {
        debug!("Rejecting subscription for {} while {:?}", security, *state);
        return Err(FeedError::NotConnected);
      }
      let mut subscriptions = self.subscriptions.lock();
      let newly_added = !subscriptions.contains_key(security);
      subscriptions.entry(security.clone()).or_default().pending += 1;
      newly_added
    };
    if !newly_added {
      debug!("{} already subscribed; re-sending subscription", security);
    }

    let result = self.message_broker.send_tick_subscription(security);
    self.complete_send(security, result.is_ok());
    if let Err(e) = result {
      warn!("Sending tick subscription for {} failed: {}", security, e);
      return Err(e);
    }
    info!("Subscribed to ticks for {}", security);
    Ok(())
  }

  /// Settles one outstanding send. A registration is rolled back only when no send for it
  /// has succeeded and none is still in progress. Registrations removed in the meantime
  /// by unsubscribe or a disconnect are left alone.
  fn complete_send(&self, security: &Security, sent: bool) {
    let mut subscriptions = self.subscriptions.lock();
    let Some(registration) = subscriptions.get_mut(security) else {
      return;
    };
    registration.pending = registration.pending.saturating_sub(1);
    registration.confirmed |= sent;
    if !registration.confirmed && registration.pending == 0 {
      subscriptions.remove(security);
      debug!("Rolled back registration for {}", security);
    }
  }

  /// Stops streaming ticks for `security`. No-op if it was not subscribed.
  pub fn unsubscribe(&self, security: &Security) -> Result<(), FeedError> {
    let send = {
      let state = self.state.read();
      let removed = self.subscriptions.lock().remove(security).is_some();
      if !removed {
        debug!("Unsubscribe for {} ignored: not subscribed", security);
        return Ok(());
      }
      *state == SessionState::Connected
    };
    info!("Unsubscribed from ticks for {}", security);
    if send {
      self.message_broker.send_tick_unsubscription(security)?;
    }
    Ok(())
  }

  /// Drops every registration without telling the feed. Called by the session manager
  /// while it holds the state lock during the disconnect transition.
  pub(crate) fn clear(&self) -> usize {
    let mut subscriptions = self.subscriptions.lock();
    let count = subscriptions.len();
    subscriptions.clear();
    count
  }

  pub fn is_subscribed(&self, security: &Security) -> bool {
    self.subscriptions.lock().contains_key(security)
  }

  /// Currently subscribed securities, sorted by symbol.
  pub fn subscriptions(&self) -> Vec<Security> {
    self.subscriptions.lock().keys().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.subscriptions.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.subscriptions.lock().is_empty()
  }
}

impl MarketDataHandler for SubscriptionRegistry {
  fn tick(&self, tick: &Tick) {
    if !self.is_subscribed(&tick.security) {
      trace!("Dropping tick for unsubscribed {}", tick.security);
      return;
    }
    self.dispatcher.publish_tick(tick);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn::MockTransport;
  use chrono::Utc;
  use parking_lot::RwLock;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn registry_with(transport: MockTransport, state: SessionState) -> (Arc<SubscriptionRegistry>, Arc<EventDispatcher>) {
    let dispatcher = Arc::new(EventDispatcher::new());
    let broker = Arc::new(MessageBroker::new(Box::new(transport)));
    let registry = SubscriptionRegistry::new(broker, Arc::new(RwLock::new(state)), dispatcher.clone());
    (registry, dispatcher)
  }

  #[test]
  fn test_subscribe_while_disconnected_sends_nothing() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription().times(0);
    let (registry, _) = registry_with(transport, SessionState::Disconnected);

    assert_eq!(registry.subscribe(&Security::new("AGQ")), Err(FeedError::NotConnected));
    assert!(registry.is_empty());
  }

  #[test]
  fn test_subscribe_rejected_while_connecting() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription().times(0);
    let (registry, _) = registry_with(transport, SessionState::Connecting);
    assert_eq!(registry.subscribe(&Security::new("AGQ")), Err(FeedError::NotConnected));
  }

  #[test]
  fn test_duplicate_subscribe_keeps_one_entry() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription()
      .withf(|s| s.symbol == "AGQ")
      .times(2)
      .returning(|_| Ok(()));
    let (registry, _) = registry_with(transport, SessionState::Connected);

    registry.subscribe(&Security::new("AGQ")).unwrap();
    registry.subscribe(&Security::new("AGQ")).unwrap();
    assert_eq!(registry.subscriptions(), vec![Security::new("AGQ")]);
  }

  #[test]
  fn test_failed_send_rolls_back_new_registration() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription()
      .returning(|_| Err(FeedError::TransportError("socket closed".into())));
    let (registry, _) = registry_with(transport, SessionState::Connected);

    assert!(matches!(registry.subscribe(&Security::new("AGQ")), Err(FeedError::TransportError(_))));
    assert!(!registry.is_subscribed(&Security::new("AGQ")));
  }

  /// Holds the first tick subscription until released, then fails it. Later ones succeed.
  struct GatedTransport {
    calls: AtomicUsize,
    entered: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
  }

  impl crate::conn::Transport for GatedTransport {
    fn connect(&self, _params: &crate::config::ConnectionParameters) -> Result<(), FeedError> { Ok(()) }
    fn disconnect(&self) -> Result<(), FeedError> { Ok(()) }
    fn send_tick_subscription(&self, _security: &Security) -> Result<(), FeedError> {
      if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
        return Ok(());
      }
      let _ = self.entered.send(());
      let _ = self.release.recv_timeout(std::time::Duration::from_secs(5));
      Err(FeedError::TransportError("socket closed".into()))
    }
    fn send_tick_unsubscription(&self, _security: &Security) -> Result<(), FeedError> { Ok(()) }
    fn send_historical_request(&self, _request: &crate::data::HistoricDataRequest) -> Result<(), FeedError> { Ok(()) }
    fn set_message_handler(&self, _handler: crate::handler::MessageHandler) {}
  }

  #[test]
  fn test_failed_send_keeps_registration_confirmed_by_other_subscriber() {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let transport = GatedTransport { calls: AtomicUsize::new(0), entered: entered_tx, release: release_rx };
    let broker = Arc::new(MessageBroker::new(Box::new(transport)));
    let registry = SubscriptionRegistry::new(broker, Arc::new(RwLock::new(SessionState::Connected)),
                                             Arc::new(EventDispatcher::new()));

    let r = registry.clone();
    let first = std::thread::spawn(move || r.subscribe(&Security::new("AGQ")));
    entered_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

    registry.subscribe(&Security::new("AGQ")).unwrap();
    release_tx.send(()).unwrap();

    assert!(matches!(first.join().unwrap(), Err(FeedError::TransportError(_))));
    // The second send reached the feed, so ticks must keep flowing.
    assert!(registry.is_subscribed(&Security::new("AGQ")));
  }

  #[test]
  fn test_unsubscribe() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription().returning(|_| Ok(()));
    transport.expect_send_tick_unsubscription()
      .withf(|s| s.symbol == "AGQ")
      .times(1)
      .returning(|_| Ok(()));
    let (registry, _) = registry_with(transport, SessionState::Connected);

    registry.subscribe(&Security::new("AGQ")).unwrap();
    registry.unsubscribe(&Security::new("AGQ")).unwrap();
    // Second call is a no-op and must not reach the transport again.
    registry.unsubscribe(&Security::new("AGQ")).unwrap();
    assert!(registry.is_empty());
  }

  #[test]
  fn test_ticks_routed_only_for_subscribed_securities() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription().returning(|_| Ok(()));
    let (registry, dispatcher) = registry_with(transport, SessionState::Connected);

    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
      let c = count.clone();
      dispatcher.add_tick_observer(move |t| {
        assert_eq!(t.security.symbol, "AGQ");
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    registry.subscribe(&Security::new("AGQ")).unwrap();
    registry.tick(&Tick::trade(Security::new("AGQ"), Utc::now(), 10.5, 1.0));
    registry.tick(&Tick::trade(Security::new("IBM"), Utc::now(), 150.0, 1.0));
    // One tick, two observers.
    assert_eq!(count.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_clear_does_not_send_unsubscriptions() {
    let mut transport = MockTransport::new();
    transport.expect_send_tick_subscription().returning(|_| Ok(()));
    transport.expect_send_tick_unsubscription().times(0);
    let (registry, _) = registry_with(transport, SessionState::Connected);

    registry.subscribe(&Security::new("AGQ")).unwrap();
    registry.subscribe(&Security::new("MSFT")).unwrap();
    assert_eq!(registry.clear(), 2);
    assert!(registry.is_empty());
  }
}
