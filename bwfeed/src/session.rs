// bwfeed/src/session.rs
//! Connection lifecycle of the feed session.
//!
//! ```text
//!  Disconnected --start()--> Connecting --logon--> Connected
//!        ^                       |                     |
//!        |                    stop()                stop()
//!        |                       v                     v
//!        +--logout / timeout-- Disconnecting <---------+
//! ```
//!
//! A logout event moves any state to `Disconnected`. A failed connect moves
//! `Connecting` back to `Disconnected`. Nothing reconnects automatically.

use crate::base::FeedError;
use crate::config::ConnectionParameters;
use crate::conn::MessageBroker;
use crate::data::HistoricDataRequest;
use crate::dispatcher::EventDispatcher;
use crate::handler::SessionHandler;
use crate::historical::HistoricalRequestTracker;
use crate::subscription::SubscriptionRegistry;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
  Disconnected,
  Connecting,
  Connected,
  Disconnecting,
}

/// The state cell shared with the registry and the tracker. Transitions take the write
/// lock; subscribe/submit hold the read lock while they register, so a disconnect can
/// never leave a registration from a dead session behind.
pub(crate) type SharedState = Arc<RwLock<SessionState>>;

pub struct SessionManager {
  message_broker: Arc<MessageBroker>,
  params: ConnectionParameters,
  provider_name: String,
  logout_timeout: Duration,
  state: SharedState,
  // Only read or written while holding the state write lock, except in
  // enforce_logout_deadline's read-only probe.
  logout_deadline: Mutex<Option<Instant>>,
  registry: Arc<SubscriptionRegistry>,
  tracker: Arc<HistoricalRequestTracker>,
  dispatcher: Arc<EventDispatcher>,
}

/// What a disconnect transition removed; reported once the state lock is released.
struct Teardown {
  provider: String,
  subscriptions_cleared: usize,
  lost_requests: Vec<HistoricDataRequest>,
}

impl SessionManager {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    message_broker: Arc<MessageBroker>,
    params: ConnectionParameters,
    provider_name: &str,
    logout_timeout: Duration,
    state: SharedState,
    registry: Arc<SubscriptionRegistry>,
    tracker: Arc<HistoricalRequestTracker>,
    dispatcher: Arc<EventDispatcher>,
  ) -> Arc<Self> {
    info!("Creating new SessionManager for provider '{}'", provider_name);
    Arc::new(SessionManager {
      message_broker,
      params,
      provider_name: provider_name.to_string(),
      logout_timeout,
      state,
      logout_deadline: Mutex::new(None),
      registry,
      tracker,
      dispatcher,
    })
  }

  pub fn state(&self) -> SessionState {
    *self.state.read()
  }

  pub fn is_connected(&self) -> bool {
    self.state() == SessionState::Connected
  }

  pub fn provider_name(&self) -> &str {
    &self.provider_name
  }

  /// Opens the session. Valid only while `Disconnected`.
  ///
  /// Returns as soon as the transport has been asked to connect; the logon observers
  /// are notified when the feed accepts the logon. A connect failure is reported on the
  /// connection-failed channel and leaves the session `Disconnected`.
  ///
  /// # Errors
  /// `AlreadyRunning` if the session is not `Disconnected`. Nothing is sent in that case.
  pub fn start(&self) -> Result<(), FeedError> {
    {
      let mut state = self.state.write();
      if *state != SessionState::Disconnected {
        return Err(FeedError::AlreadyRunning(format!("session is {:?}", *state)));
      }
      *state = SessionState::Connecting;
    }
    info!("Session starting: connecting to {}", self.params.server_address());

    if let Err(e) = self.message_broker.connect(&self.params) {
      let reverted = {
        let mut state = self.state.write();
        if *state == SessionState::Connecting {
          *state = SessionState::Disconnected;
          true
        } else {
          false
        }
      };
      if !reverted {
        // A logon or stop got there first.
        warn!("Connect to {} reported {} after the session left Connecting; ignored",
              self.params.server_address(), e);
        return Ok(());
      }
      error!("Connect to {} failed: {}", self.params.server_address(), e);
      let error = match e {
        FeedError::ConnectionFailed(_) => e,
        other => FeedError::ConnectionFailed(other.to_string()),
      };
      self.dispatcher.publish_connection_failed(&error);
    }
    Ok(())
  }

  /// Requests a logout. Valid from `Connecting` or `Connected`; a no-op otherwise.
  ///
  /// The session becomes `Disconnected` when the logout event arrives, or when the
  /// logout timeout passes without one. If the transport refuses the disconnect request
  /// the session is torn down immediately.
  pub fn stop(&self) -> Result<(), FeedError> {
    {
      let mut state = self.state.write();
      match *state {
        SessionState::Connected | SessionState::Connecting => {
          *state = SessionState::Disconnecting;
          *self.logout_deadline.lock() = Some(Instant::now() + self.logout_timeout);
        }
        other => {
          debug!("stop() ignored while {:?}", other);
          return Ok(());
        }
      }
    }
    info!("Session stopping: requesting logout");

    if let Err(e) = self.message_broker.disconnect() {
      warn!("Disconnect request failed ({}); tearing session down locally", e);
      let teardown = {
        let mut state = self.state.write();
        self.teardown_locked(&mut state, &self.provider_name)
      };
      self.report(teardown);
    }
    Ok(())
  }

  /// Tears the session down if a `stop()` has been waiting for the logout event past
  /// the logout timeout. Returns true if it did.
  pub fn enforce_logout_deadline(&self, now: Instant) -> bool {
    let overdue = |state: SessionState, deadline: Option<Instant>| {
      state == SessionState::Disconnecting && deadline.is_some_and(|d| d <= now)
    };
    // Cheap probe first; the housekeeping thread calls this constantly.
    if !overdue(*self.state.read(), *self.logout_deadline.lock()) {
      return false;
    }

    let teardown = {
      let mut state = self.state.write();
      if !overdue(*state, *self.logout_deadline.lock()) {
        return false;
      }
      warn!("No logout received within {:?}; closing session locally", self.logout_timeout);
      self.teardown_locked(&mut state, &self.provider_name)
    };
    self.report(teardown);
    true
  }

  /// Moves to `Disconnected` and purges the registry and the tracker in the same
  /// critical section. Returns None if the session was already disconnected.
  fn teardown_locked(&self, state: &mut SessionState, provider: &str) -> Option<Teardown> {
    if *state == SessionState::Disconnected {
      return None;
    }
    debug!("Session {:?} -> Disconnected", *state);
    *state = SessionState::Disconnected;
    *self.logout_deadline.lock() = None;
    Some(Teardown {
      provider: provider.to_string(),
      subscriptions_cleared: self.registry.clear(),
      lost_requests: self.tracker.drain(),
    })
  }

  fn report(&self, teardown: Option<Teardown>) {
    let Some(teardown) = teardown else { return };
    info!("Session with {} closed: {} subscription(s) dropped, {} request(s) lost",
          teardown.provider, teardown.subscriptions_cleared, teardown.lost_requests.len());
    self.dispatcher.publish_logout(&teardown.provider);
    self.tracker.publish_failures(&teardown.lost_requests, &FeedError::ConnectionLost);
  }
}

impl SessionHandler for SessionManager {
  fn logon(&self, provider: &str) {
    let notify = {
      let mut state = self.state.write();
      match *state {
        SessionState::Connecting => {
          *state = SessionState::Connected;
          true
        }
        SessionState::Connected => {
          debug!("Duplicate logon from {} ignored", provider);
          false
        }
        other => {
          warn!("Logon from {} ignored while {:?}", provider, other);
          false
        }
      }
    };
    if notify {
      info!("Logon accepted by {}", provider);
      self.dispatcher.publish_logon(provider);
    }
  }

  fn logout(&self, provider: &str) {
    let provider = if provider.is_empty() { self.provider_name.as_str() } else { provider };
    let teardown = {
      let mut state = self.state.write();
      if *state == SessionState::Disconnected {
        debug!("Logout from {} while already disconnected; ignored", provider);
        return;
      }
      if *state != SessionState::Disconnecting {
        warn!("Unsolicited logout from {} while {:?}", provider, *state);
      }
      self.teardown_locked(&mut state, provider)
    };
    self.report(teardown);
  }
}
