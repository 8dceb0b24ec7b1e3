// bwfeed/src/dispatcher.rs
//! Fan-out of feed events to registered observers.
//!
//! Every kind of notification has its own channel with an ordered list of observers.
//! Observers are plain closures registered with `add_*_observer` and removed with
//! [`EventDispatcher::remove_observer`] using the returned [`ObserverId`].
//!
//! Within one channel events are delivered one at a time, in the order they were
//! published. An observer that returns an error or panics is logged and skipped; the
//! remaining observers still receive the event, and later events are unaffected.

use crate::base::FeedError;
use crate::data::{HistoricBarData, RequestFailure, Tick};
use log::{debug, error, trace, warn};
use parking_lot::{ReentrantMutex, RwLock};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What an observer returns. Errors are logged by the dispatcher, never propagated.
pub type ObserverResult = anyhow::Result<()>;

type ObserverFn<E> = Arc<dyn Fn(&E) -> ObserverResult + Send + Sync>;

/// Unique identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub usize);

/// The notification channels of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
  Logon,
  Logout,
  Tick,
  HistoricBarData,
  RequestFailed,
  ConnectionFailed,
}

impl fmt::Display for EventChannel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      EventChannel::Logon => "LogonArrived",
      EventChannel::Logout => "LogoutArrived",
      EventChannel::Tick => "TickArrived",
      EventChannel::HistoricBarData => "HistoricBarDataArrived",
      EventChannel::RequestFailed => "HistoricRequestFailed",
      EventChannel::ConnectionFailed => "ConnectionFailed",
    };
    write!(f, "{}", s)
  }
}

struct ObserverList<E> {
  channel: EventChannel,
  observers: RwLock<Vec<(ObserverId, ObserverFn<E>)>>,
  // Serializes deliveries on this channel. Re-entrant so an observer may trigger
  // another event on the same channel from its own thread.
  delivery: ReentrantMutex<()>,
}

impl<E> ObserverList<E> {
  fn new(channel: EventChannel) -> Self {
    ObserverList {
      channel,
      observers: RwLock::new(Vec::new()),
      delivery: ReentrantMutex::new(()),
    }
  }

  fn add(&self, id: ObserverId, observer: ObserverFn<E>) {
    self.observers.write().push((id, observer));
    debug!("Added {} observer with ID: {}", self.channel, id.0);
  }

  fn remove(&self, id: ObserverId) -> bool {
    let mut observers = self.observers.write();
    let before = observers.len();
    observers.retain(|(oid, _)| *oid != id);
    observers.len() != before
  }

  fn len(&self) -> usize {
    self.observers.read().len()
  }

  /// Delivers `event` to every observer. Returns how many handled it without failing.
  fn publish(&self, event: &E) -> usize {
    let _delivery = self.delivery.lock();
    // Snapshot so observers can add/remove observers while being notified.
    let observers: Vec<(ObserverId, ObserverFn<E>)> = self.observers.read().clone();
    trace!("Dispatching {} to {} observer(s)", self.channel, observers.len());

    let mut delivered = 0;
    for (id, observer) in observers {
      match catch_unwind(AssertUnwindSafe(|| observer(event))) {
        Ok(Ok(())) => delivered += 1,
        Ok(Err(e)) => warn!("{} observer {} failed: {:#}", self.channel, id.0, e),
        Err(_) => error!("{} observer {} panicked; continuing with remaining observers", self.channel, id.0),
      }
    }
    delivered
  }
}

/// Per-channel observer registry shared by the session, the subscription registry and
/// the historical request tracker.
pub struct EventDispatcher {
  next_observer_id: AtomicUsize,
  logon: ObserverList<String>,
  logout: ObserverList<String>,
  tick: ObserverList<Tick>,
  historic_bar_data: ObserverList<HistoricBarData>,
  request_failed: ObserverList<RequestFailure>,
  connection_failed: ObserverList<FeedError>,
}

impl Default for EventDispatcher {
  fn default() -> Self {
    Self::new()
  }
}

impl EventDispatcher {
  pub fn new() -> Self {
    EventDispatcher {
      next_observer_id: AtomicUsize::new(1),
      logon: ObserverList::new(EventChannel::Logon),
      logout: ObserverList::new(EventChannel::Logout),
      tick: ObserverList::new(EventChannel::Tick),
      historic_bar_data: ObserverList::new(EventChannel::HistoricBarData),
      request_failed: ObserverList::new(EventChannel::RequestFailed),
      connection_failed: ObserverList::new(EventChannel::ConnectionFailed),
    }
  }

  fn next_id(&self) -> ObserverId {
    ObserverId(self.next_observer_id.fetch_add(1, Ordering::SeqCst))
  }

  /// Called with the provider name each time a session is established.
  pub fn add_logon_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&str) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.logon.add(id, Arc::new(move |name: &String| observer(name)));
    id
  }

  /// Called with the provider name each time a session ends.
  pub fn add_logout_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&str) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.logout.add(id, Arc::new(move |name: &String| observer(name)));
    id
  }

  pub fn add_tick_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&Tick) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.tick.add(id, Arc::new(observer));
    id
  }

  pub fn add_historic_bar_data_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&HistoricBarData) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.historic_bar_data.add(id, Arc::new(observer));
    id
  }

  /// Called once for each historical request that times out or is cut off by a
  /// disconnect.
  pub fn add_request_failed_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&RequestFailure) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.request_failed.add(id, Arc::new(observer));
    id
  }

  pub fn add_connection_failed_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&FeedError) -> ObserverResult + Send + Sync + 'static {
    let id = self.next_id();
    self.connection_failed.add(id, Arc::new(observer));
    id
  }

  /// Removes a previously registered observer from whichever channel holds it.
  ///
  /// Returns `true` if an observer with the given ID was found and removed.
  pub fn remove_observer(&self, id: ObserverId) -> bool {
    let removed = self.logon.remove(id)
      || self.logout.remove(id)
      || self.tick.remove(id)
      || self.historic_bar_data.remove(id)
      || self.request_failed.remove(id)
      || self.connection_failed.remove(id);
    if removed {
      debug!("Removed observer with ID: {}", id.0);
    } else {
      warn!("Attempted to remove non-existent observer ID: {}", id.0);
    }
    removed
  }

  pub fn observer_count(&self, channel: EventChannel) -> usize {
    match channel {
      EventChannel::Logon => self.logon.len(),
      EventChannel::Logout => self.logout.len(),
      EventChannel::Tick => self.tick.len(),
      EventChannel::HistoricBarData => self.historic_bar_data.len(),
      EventChannel::RequestFailed => self.request_failed.len(),
      EventChannel::ConnectionFailed => self.connection_failed.len(),
    }
  }

  pub(crate) fn publish_logon(&self, provider: &str) -> usize {
    self.logon.publish(&provider.to_string())
  }

  pub(crate) fn publish_logout(&self, provider: &str) -> usize {
    self.logout.publish(&provider.to_string())
  }

  pub(crate) fn publish_tick(&self, tick: &Tick) -> usize {
    self.tick.publish(tick)
  }

  pub(crate) fn publish_historic_bar_data(&self, data: &HistoricBarData) -> usize {
    self.historic_bar_data.publish(data)
  }

  pub(crate) fn publish_request_failed(&self, failure: &RequestFailure) -> usize {
    self.request_failed.publish(failure)
  }

  pub(crate) fn publish_connection_failed(&self, error: &FeedError) -> usize {
    self.connection_failed.publish(error)
  }
}
