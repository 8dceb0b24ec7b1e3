// bwfeed/src/historical.rs
//! Correlation of historical bar requests with their responses.
//!
//! Each submitted request is tracked by its caller-chosen id until exactly one of three
//! things happens: the final bars arrive, its deadline passes, or the session drops.
//! Whichever comes first resolves the request; the other two then find nothing to do.

use crate::base::FeedError;
use crate::conn::MessageBroker;
use crate::data::{Bar, HistoricBarData, HistoricDataRequest, RequestFailure};
use crate::dispatcher::EventDispatcher;
use crate::handler::HistoricalDataHandler;
use crate::session::{SessionState, SharedState};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct InFlightRequest {
  request: HistoricDataRequest,
  deadline: Instant,
  // Bars from chunks received before the final one.
  buffered: Vec<Bar>,
  chunks: usize,
}

pub struct HistoricalRequestTracker {
  message_broker: Arc<MessageBroker>,
  state: SharedState,
  dispatcher: Arc<EventDispatcher>,
  request_timeout: Duration,
  in_flight: Mutex<HashMap<String, InFlightRequest>>,
}

impl HistoricalRequestTracker {
  pub(crate) fn new(
    message_broker: Arc<MessageBroker>,
    state: SharedState,
    dispatcher: Arc<EventDispatcher>,
    request_timeout: Duration,
  ) -> Arc<Self> {
    Arc::new(HistoricalRequestTracker {
      message_broker,
      state,
      dispatcher,
      request_timeout,
      in_flight: Mutex::new(HashMap::new()),
    })
  }

  /// Submits a historical bar request.
  ///
  /// # Errors
  /// * `InvalidParameter` if the request is malformed.
  /// * `NotConnected` unless the session is connected.
  /// * `DuplicateRequestId` if a request with the same id is still in flight.
  /// * The transport's error if the request could not be sent; the id is released.
  ///
  /// On `Ok` the request is in flight and resolves later through either the
  /// historic-bar-data channel or the request-failed channel of the dispatcher.
  pub fn submit(&self, request: HistoricDataRequest) -> Result<(), FeedError> {
    request.validate()?;
    {
      let state = self.state.read();
      if *state != SessionState::Connected {
        debug!("Rejecting historical request {} while {:?}", request.id, *state);
        return Err(FeedError::NotConnected);
      }
      let mut in_flight = self.in_flight.lock();
      if in_flight.contains_key(&request.id) {
        return Err(FeedError::DuplicateRequestId(request.id.clone()));
      }
      in_flight.insert(request.id.clone(), InFlightRequest {
        request: request.clone(),
        deadline: Instant::now() + self.request_timeout,
        buffered: Vec::new(),
        chunks: 0,
      });
    }

    if let Err(e) = self.message_broker.send_historical_request(&request) {
      if self.in_flight.lock().remove(&request.id).is_some() {
        warn!("Sending historical request {} failed: {}", request.id, e);
        return Err(e);
      }
      // Already resolved (and reported) by a disconnect that raced with the send.
      debug!("Send of request {} failed after it was resolved: {}", request.id, e);
      return Ok(());
    }
    info!("Historical request {} submitted: {} {} x{} from {} to {}",
          request.id, request.security, request.bar_type, request.interval,
          request.start_time, request.end_time);
    Ok(())
  }

  /// Resolves every request whose deadline is at or before `now` as `RequestTimedOut`.
  /// Returns the number of requests that timed out.
  pub fn expire_overdue(&self, now: Instant) -> usize {
    let expired: Vec<HistoricDataRequest> = {
      let mut in_flight = self.in_flight.lock();
      let ids: Vec<String> = in_flight.iter()
        .filter(|(_, entry)| entry.deadline <= now)
        .map(|(id, _)| id.clone())
        .collect();
      ids.iter().filter_map(|id| in_flight.remove(id)).map(|entry| entry.request).collect()
    };

    for request in &expired {
      warn!("Historical request {} for {} timed out after {:?}", request.id, request.security, self.request_timeout);
      self.dispatcher.publish_request_failed(&RequestFailure {
        request_id: request.id.clone(),
        security: request.security.clone(),
        error: FeedError::RequestTimedOut(request.id.clone()),
      });
    }
    expired.len()
  }

  /// Removes every in-flight request. Called by the session manager under its state lock;
  /// the caller reports the failures once the lock is released.
  pub(crate) fn drain(&self) -> Vec<HistoricDataRequest> {
    let mut in_flight = self.in_flight.lock();
    let mut requests: Vec<HistoricDataRequest> = in_flight.drain().map(|(_, entry)| entry.request).collect();
    requests.sort_by(|a, b| a.id.cmp(&b.id));
    requests
  }

  pub(crate) fn publish_failures(&self, requests: &[HistoricDataRequest], error: &FeedError) {
    for request in requests {
      debug!("Historical request {} resolved as {}", request.id, error);
      self.dispatcher.publish_request_failed(&RequestFailure {
        request_id: request.id.clone(),
        security: request.security.clone(),
        error: error.clone(),
      });
    }
  }

  pub fn is_in_flight(&self, request_id: &str) -> bool {
    self.in_flight.lock().contains_key(request_id)
  }

  pub fn in_flight_count(&self) -> usize {
    self.in_flight.lock().len()
  }

  /// Ids of the requests still waiting for an answer, sorted.
  pub fn in_flight_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.in_flight.lock().keys().cloned().collect();
    ids.sort();
    ids
  }
}

impl HistoricalDataHandler for HistoricalRequestTracker {
  fn historical_bar_data(&self, request_id: &str, bars: &[Bar], is_final: bool) {
    let mut in_flight = self.in_flight.lock();

    if !is_final {
      match in_flight.get_mut(request_id) {
        Some(entry) => {
          entry.buffered.extend_from_slice(bars);
          entry.chunks += 1;
          entry.deadline = Instant::now() + self.request_timeout;
          debug!("Request {}: buffered chunk {} ({} bars so far)", request_id, entry.chunks, entry.buffered.len());
        }
        None => debug!("Dropping partial bars for unknown request {}", request_id),
      }
      return;
    }

    let Some(mut entry) = in_flight.remove(request_id) else {
      // Timed out earlier, answered twice, or left over from a previous session.
      debug!("Dropping {} bars for unknown request {}", bars.len(), request_id);
      return;
    };
    drop(in_flight);

    entry.buffered.extend_from_slice(bars);
    let data = HistoricBarData {
      request_id: entry.request.id,
      security: entry.request.security,
      bar_type: entry.request.bar_type,
      bars: entry.buffered,
    };
    info!("Historical request {} completed with {} bars", data.request_id, data.bars.len());
    self.dispatcher.publish_historic_bar_data(&data);
  }
}
