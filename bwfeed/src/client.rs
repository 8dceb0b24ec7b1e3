// bwfeed/src/client.rs
//! The caller-facing adapter.
//!
//! ```no_run
//! use bwfeed::{FeedClient, ConnectionParameters, ClientConfig, Subscribe};
//! use bwfeed::conn_mock::{ScriptedTransport, ScriptedBehavior};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), bwfeed::FeedError> {
//! let params = ConnectionParameters::from_xml_file("BlackwoodParams.xml")?;
//! let transport = ScriptedTransport::new(ScriptedBehavior::default());
//! let client = Arc::new(FeedClient::new(params, Box::new(transport), ClientConfig::default()));
//!
//! // Observers live inside the client; capture it weakly or it is never dropped.
//! let c = Arc::downgrade(&client);
//! client.add_logon_observer(move |_provider| {
//!   if let Some(c) = c.upgrade() {
//!     c.subscribe_tick_data(&Subscribe::new("AGQ"))?;
//!   }
//!   Ok(())
//! });
//! client.add_tick_observer(|tick| {
//!   println!("{} @ {}", tick.security, tick.last_price);
//!   Ok(())
//! });
//! client.start()?;
//! # Ok(())
//! # }
//! ```

use crate::base::FeedError;
use crate::config::{ClientConfig, ConnectionParameters};
use crate::conn::{MessageBroker, Transport};
use crate::data::{HistoricBarData, HistoricDataRequest, RequestFailure, Security, Subscribe, Tick};
use crate::dispatcher::{EventDispatcher, ObserverId, ObserverResult};
use crate::handler::MessageHandler;
use crate::historical::HistoricalRequestTracker;
use crate::session::{SessionManager, SessionState, SharedState};
use crate::subscription::SubscriptionRegistry;
use log::{debug, error};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

pub struct FeedClient {
  session: Arc<SessionManager>,
  registry: Arc<SubscriptionRegistry>,
  tracker: Arc<HistoricalRequestTracker>,
  dispatcher: Arc<EventDispatcher>,
  stop_flag: Arc<AtomicBool>,
  housekeeping: Option<thread::JoinHandle<()>>,
}

impl FeedClient {
  /// Builds the adapter around an already validated parameter set and a transport.
  /// Nothing is sent until `start()` is called.
  pub fn new(params: ConnectionParameters, transport: Box<dyn Transport>, config: ClientConfig) -> Self {
    let message_broker = Arc::new(MessageBroker::new(transport));
    let state: SharedState = Arc::new(RwLock::new(SessionState::Disconnected));
    let dispatcher = Arc::new(EventDispatcher::new());
    let registry = SubscriptionRegistry::new(message_broker.clone(), state.clone(), dispatcher.clone());
    let tracker = HistoricalRequestTracker::new(message_broker.clone(), state.clone(),
                                                dispatcher.clone(), config.request_timeout);
    let session = SessionManager::new(message_broker.clone(), params, &config.provider_name,
                                      config.logout_timeout, state, registry.clone(),
                                      tracker.clone(), dispatcher.clone());
    message_broker.set_message_handler(MessageHandler::new(&session, &registry, &tracker));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let housekeeping = spawn_housekeeping(
      Arc::downgrade(&session), Arc::downgrade(&tracker), stop_flag.clone(), config.housekeeping_interval);

    FeedClient {
      session,
      registry,
      tracker,
      dispatcher,
      stop_flag,
      housekeeping,
    }
  }

  /// Connects and logs on. See [`SessionManager::start`].
  pub fn start(&self) -> Result<(), FeedError> {
    self.session.start()
  }

  /// Logs off and disconnects. See [`SessionManager::stop`].
  pub fn stop(&self) -> Result<(), FeedError> {
    self.session.stop()
  }

  pub fn state(&self) -> SessionState {
    self.session.state()
  }

  pub fn is_connected(&self) -> bool {
    self.session.is_connected()
  }

  pub fn provider_name(&self) -> &str {
    self.session.provider_name()
  }

  pub fn subscribe_tick_data(&self, subscribe: &Subscribe) -> Result<(), FeedError> {
    self.registry.subscribe(&subscribe.security)
  }

  pub fn unsubscribe_tick_data(&self, subscribe: &Subscribe) -> Result<(), FeedError> {
    self.registry.unsubscribe(&subscribe.security)
  }

  /// Submits a historical bar request. The answer arrives on the historic-bar-data
  /// observers; a timeout or a lost session arrives on the request-failed observers.
  pub fn historic_bar_data_request(&self, request: HistoricDataRequest) -> Result<(), FeedError> {
    self.tracker.submit(request)
  }

  pub fn subscriptions(&self) -> Vec<Security> {
    self.registry.subscriptions()
  }

  pub fn in_flight_requests(&self) -> Vec<String> {
    self.tracker.in_flight_ids()
  }

  /// Registers a logon observer.
  ///
  /// Observers are owned by the client. One that calls back into the client must hold
  /// a `Weak<FeedClient>` (`Arc::downgrade`): an `Arc` clone keeps the client alive, so
  /// it never logs off on drop. The same holds for every `add_*_observer` method.
  pub fn add_logon_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&str) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_logon_observer(observer)
  }

  pub fn add_logout_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&str) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_logout_observer(observer)
  }

  pub fn add_tick_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&Tick) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_tick_observer(observer)
  }

  pub fn add_historic_bar_data_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&HistoricBarData) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_historic_bar_data_observer(observer)
  }

  pub fn add_request_failed_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&RequestFailure) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_request_failed_observer(observer)
  }

  pub fn add_connection_failed_observer<F>(&self, observer: F) -> ObserverId
  where F: Fn(&FeedError) -> ObserverResult + Send + Sync + 'static {
    self.dispatcher.add_connection_failed_observer(observer)
  }

  pub fn remove_observer(&self, id: ObserverId) -> bool {
    self.dispatcher.remove_observer(id)
  }

  pub fn dispatcher(&self) -> Arc<EventDispatcher> {
    self.dispatcher.clone()
  }

  pub fn session(&self) -> Arc<SessionManager> {
    self.session.clone()
  }

  pub fn registry(&self) -> Arc<SubscriptionRegistry> {
    self.registry.clone()
  }

  pub fn tracker(&self) -> Arc<HistoricalRequestTracker> {
    self.tracker.clone()
  }
}

impl Drop for FeedClient {
  fn drop(&mut self) {
    if let Err(e) = self.session.stop() {
      error!("Error stopping session on drop: {}", e);
    }
    self.stop_flag.store(true, Ordering::SeqCst);
    if let Some(handle) = self.housekeeping.take() {
      handle.thread().unpark();
      if handle.join().is_err() {
        error!("Housekeeping thread panicked");
      }
    }
  }
}

/// Enforces request and logout deadlines until `stop_flag` is raised or the managers
/// are gone.
fn spawn_housekeeping(
  session: Weak<SessionManager>,
  tracker: Weak<HistoricalRequestTracker>,
  stop_flag: Arc<AtomicBool>,
  interval: Duration,
) -> Option<thread::JoinHandle<()>> {
  let spawned = thread::Builder::new()
    .name("bwfeed-housekeeping".to_string())
    .spawn(move || {
      debug!("Housekeeping thread started ({:?} interval)", interval);
      loop {
        thread::park_timeout(interval);
        if stop_flag.load(Ordering::SeqCst) {
          break;
        }
        let (Some(session), Some(tracker)) = (session.upgrade(), tracker.upgrade()) else {
          break;
        };
        let now = Instant::now();
        tracker.expire_overdue(now);
        session.enforce_logout_deadline(now);
      }
      debug!("Housekeeping thread ended");
    });
  match spawned {
    Ok(handle) => Some(handle),
    Err(e) => {
      error!("Failed to spawn housekeeping thread; deadlines will not be enforced: {}", e);
      None
    }
  }
}

impl std::fmt::Debug for FeedClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FeedClient")
      .field("provider", &self.session.provider_name())
      .field("state", &self.session.state())
      .field("subscriptions", &self.registry.len())
      .field("in_flight", &self.tracker.in_flight_count())
      .finish()
  }
}
