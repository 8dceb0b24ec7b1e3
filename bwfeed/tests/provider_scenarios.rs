// End-to-end provider scenarios against the scripted feed.

use bwfeed::conn_mock::{ScriptedBehavior, ScriptedTransport, SentRequest};
use bwfeed::{
  BarType, ClientConfig, ConnectionParameters, FeedClient, FeedError, HistoricBarData, HistoricDataRequest,
  RequestFailure, Security, SessionState, Subscribe, Tick,
};
use chrono::{TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

fn params() -> ConnectionParameters {
  ConnectionParameters::new("35TEST", "123456", "72.5.42.156", 5000, 5300).unwrap()
}

fn client_with(behavior: ScriptedBehavior) -> (Arc<FeedClient>, ScriptedTransport) {
  let _ = env_logger::builder().is_test(true).try_init();
  let transport = ScriptedTransport::new(behavior);
  let probe = transport.clone();
  let config = ClientConfig { provider_name: "BW".to_string(), ..ClientConfig::default() };
  (Arc::new(FeedClient::new(params(), Box::new(transport), config)), probe)
}

fn silent_feed(provider: &str) -> ScriptedBehavior {
  ScriptedBehavior { provider_name: provider.to_string(), ..ScriptedBehavior::silent() }
}

fn msft(id: &str, bar_type: BarType) -> HistoricDataRequest {
  HistoricDataRequest::new(
    id,
    Security::new("MSFT"),
    bar_type,
    1,
    Utc.with_ymd_and_hms(2015, 7, 15, 0, 0, 0).unwrap(),
    Utc.with_ymd_and_hms(2015, 7, 26, 0, 0, 0).unwrap(),
  )
}

struct Events {
  logons: Receiver<String>,
  logouts: Receiver<String>,
  ticks: Receiver<Tick>,
  bars: Receiver<HistoricBarData>,
  failures: Receiver<RequestFailure>,
}

fn record(client: &FeedClient) -> Events {
  let (logon_tx, logons) = unbounded();
  client.add_logon_observer(move |p| { logon_tx.send(p.to_string())?; Ok(()) });
  let (logout_tx, logouts) = unbounded();
  client.add_logout_observer(move |p| { logout_tx.send(p.to_string())?; Ok(()) });
  let (tick_tx, ticks) = unbounded();
  client.add_tick_observer(move |t| { tick_tx.send(t.clone())?; Ok(()) });
  let (bar_tx, bars) = unbounded();
  client.add_historic_bar_data_observer(move |d| { bar_tx.send(d.clone())?; Ok(()) });
  let (fail_tx, failures) = unbounded();
  client.add_request_failed_observer(move |f| { fail_tx.send(f.clone())?; Ok(()) });
  Events { logons, logouts, ticks, bars, failures }
}

#[test]
fn connect_yields_single_logon() {
  let (client, probe) = client_with(silent_feed("BW"));
  let events = record(&client);

  client.start().unwrap();
  assert_eq!(client.state(), SessionState::Connecting);
  probe.emit_logon();
  probe.emit_logon();

  assert_eq!(events.logons.recv_timeout(WAIT).unwrap(), "BW");
  assert!(events.logons.recv_timeout(QUIET).is_err());
  assert_eq!(client.state(), SessionState::Connected);
}

#[test]
fn subscribe_tick_then_stop() {
  let (client, probe) = client_with(silent_feed("BW"));
  let events = record(&client);

  client.start().unwrap();
  probe.emit_logon();
  events.logons.recv_timeout(WAIT).unwrap();

  client.subscribe_tick_data(&Subscribe::new("AGQ")).unwrap();
  probe.emit_tick(&Tick::trade(Security::new("AGQ"), Utc::now(), 10.5, 100.0));

  let tick = events.ticks.recv_timeout(WAIT).unwrap();
  assert_eq!(tick.security, Security::new("AGQ"));
  assert_eq!(tick.last_price, 10.5);
  assert!(events.ticks.recv_timeout(QUIET).is_err());

  client.stop().unwrap();
  assert_eq!(client.state(), SessionState::Disconnecting);
  probe.emit_logout();

  assert_eq!(events.logouts.recv_timeout(WAIT).unwrap(), "BW");
  assert!(events.logouts.recv_timeout(QUIET).is_err());
  assert!(client.subscriptions().is_empty());
  assert_eq!(client.state(), SessionState::Disconnected);
}

#[test]
fn subscribe_while_disconnected_is_rejected() {
  let (client, probe) = client_with(silent_feed("BW"));
  assert_eq!(client.subscribe_tick_data(&Subscribe::new("AGQ")), Err(FeedError::NotConnected));
  assert_eq!(client.historic_bar_data_request(msft("1", BarType::Daily)), Err(FeedError::NotConnected));
  assert!(probe.sent().is_empty());
}

#[test]
fn daily_history_request_resolves_once() {
  let (client, probe) = client_with(silent_feed("BW"));
  let events = record(&client);
  client.start().unwrap();
  probe.emit_logon();

  client.historic_bar_data_request(msft("1", BarType::Daily)).unwrap();
  assert_eq!(client.in_flight_requests(), vec!["1".to_string()]);
  let bars = bwfeed::conn_mock::synthetic_bars(&msft("1", BarType::Daily));
  probe.emit_historical_bar_data("1", &bars, true);
  probe.emit_historical_bar_data("1", &bars, true);

  let data = events.bars.recv_timeout(WAIT).unwrap();
  assert_eq!(data.request_id, "1");
  assert_eq!(data.bars.len(), bars.len());
  assert!(events.bars.recv_timeout(QUIET).is_err());
  assert!(client.in_flight_requests().is_empty());
  assert!(events.failures.try_recv().is_err());
}

#[test]
fn history_for_every_bar_type_from_logon_observer() {
  for bar_type in [BarType::Daily, BarType::Intraday, BarType::Monthly] {
    let (client, _probe) = client_with(ScriptedBehavior::default());
    let events = record(&client);
    let c = Arc::downgrade(&client);
    client.add_logon_observer(move |_| {
      if let Some(c) = c.upgrade() {
        c.historic_bar_data_request(msft("1", bar_type))?;
      }
      Ok(())
    });

    client.start().unwrap();
    let data = events.bars.recv_timeout(WAIT).unwrap();
    assert_eq!(data.bar_type, bar_type);
    assert!(!data.bars.is_empty());
  }
}

#[test]
fn chunked_history_delivered_once() {
  let (client, probe) = client_with(ScriptedBehavior { history_chunk_size: Some(5), ..ScriptedBehavior::default() });
  let events = record(&client);
  client.start().unwrap();

  client.historic_bar_data_request(msft("1", BarType::Daily)).unwrap();
  let data = events.bars.recv_timeout(WAIT).unwrap();
  assert_eq!(data.bars.len(), 12);
  assert!(events.bars.recv_timeout(QUIET).is_err());
  let requests = probe.sent().iter().filter(|r| matches!(r, SentRequest::HistoricalRequest(_))).count();
  assert_eq!(requests, 1);
}

#[test]
fn timeout_without_response() {
  let transport = ScriptedTransport::new(silent_feed("BW"));
  let probe = transport.clone();
  let config = ClientConfig {
    request_timeout: Duration::from_millis(50),
    housekeeping_interval: Duration::from_millis(10),
    ..ClientConfig::default()
  };
  let client = FeedClient::new(params(), Box::new(transport), config);
  let events = record(&client);
  client.start().unwrap();
  probe.emit_logon();

  client.historic_bar_data_request(msft("X", BarType::Daily)).unwrap();
  let failure = events.failures.recv_timeout(WAIT).unwrap();
  assert_eq!(failure.request_id, "X");
  assert_eq!(failure.error, FeedError::RequestTimedOut("X".to_string()));
  assert!(events.failures.recv_timeout(QUIET).is_err());

  // A response after the deadline is stale.
  probe.emit_historical_bar_data("X", &[], true);
  assert!(events.bars.recv_timeout(QUIET).is_err());
}

#[test]
fn logout_resolves_in_flight_requests_as_connection_lost() {
  let (client, probe) = client_with(silent_feed("BW"));
  let events = record(&client);
  client.start().unwrap();
  probe.emit_logon();

  client.subscribe_tick_data(&Subscribe::new("AGQ")).unwrap();
  client.historic_bar_data_request(msft("A", BarType::Daily)).unwrap();
  client.historic_bar_data_request(msft("B", BarType::Intraday)).unwrap();
  assert_eq!(
    client.historic_bar_data_request(msft("A", BarType::Monthly)),
    Err(FeedError::DuplicateRequestId("A".to_string()))
  );

  probe.emit_logout();

  assert_eq!(events.logouts.recv_timeout(WAIT).unwrap(), "BW");
  let mut lost: Vec<String> = (0..2)
    .map(|_| events.failures.recv_timeout(WAIT).unwrap())
    .inspect(|f| assert_eq!(f.error, FeedError::ConnectionLost))
    .map(|f| f.request_id)
    .collect();
  lost.sort();
  assert_eq!(lost, vec!["A".to_string(), "B".to_string()]);
  assert!(client.subscriptions().is_empty());
  assert!(client.in_flight_requests().is_empty());

  // Ticks from the dead session are not routed.
  probe.emit_tick(&Tick::trade(Security::new("AGQ"), Utc::now(), 11.0, 1.0));
  assert!(events.ticks.recv_timeout(QUIET).is_err());
}

#[test]
fn stop_cancels_in_flight_request() {
  let (client, _probe) = client_with(ScriptedBehavior { answer_history: false, ..ScriptedBehavior::default() });
  let events = record(&client);
  client.start().unwrap();
  client.historic_bar_data_request(msft("1", BarType::Daily)).unwrap();

  client.stop().unwrap();
  let failure = events.failures.recv_timeout(WAIT).unwrap();
  assert_eq!(failure.error, FeedError::ConnectionLost);
  assert_eq!(client.state(), SessionState::Disconnected);
}

#[test]
fn connection_failure_is_reported() {
  let (client, _probe) = client_with(ScriptedBehavior {
    fail_connect: Some("host unreachable".to_string()),
    ..ScriptedBehavior::default()
  });
  let (tx, rx) = unbounded();
  client.add_connection_failed_observer(move |e| { tx.send(e.clone())?; Ok(()) });

  client.start().unwrap();
  assert_eq!(rx.recv_timeout(WAIT).unwrap(), FeedError::ConnectionFailed("host unreachable".to_string()));
  assert_eq!(client.state(), SessionState::Disconnected);
  // A higher layer may retry.
  assert!(client.start().is_ok());
}

#[test]
fn unsubscribe_forwards_to_feed() {
  let (client, probe) = client_with(ScriptedBehavior::default());
  client.start().unwrap();
  client.subscribe_tick_data(&Subscribe::new("AGQ")).unwrap();
  client.unsubscribe_tick_data(&Subscribe::new("AGQ")).unwrap();
  client.unsubscribe_tick_data(&Subscribe::new("AGQ")).unwrap();

  let unsubscriptions: Vec<SentRequest> = probe.sent().into_iter()
    .filter(|r| matches!(r, SentRequest::TickUnsubscription(_)))
    .collect();
  assert_eq!(unsubscriptions, vec![SentRequest::TickUnsubscription(Security::new("AGQ"))]);
}

#[test]
fn concurrent_subscribe_and_logout_leave_no_stale_entries() {
  let (client, probe) = client_with(silent_feed("BW"));
  client.start().unwrap();
  probe.emit_logon();

  let subscribers: Vec<_> = (0..4).map(|i| {
    let c = client.clone();
    std::thread::spawn(move || {
      for n in 0..100 {
        let _ = c.subscribe_tick_data(&Subscribe::new(&format!("S{}_{}", i, n)));
      }
    })
  }).collect();
  let p = probe.clone();
  let dropper = std::thread::spawn(move || p.emit_logout());

  for s in subscribers {
    s.join().unwrap();
  }
  dropper.join().unwrap();

  assert_eq!(client.state(), SessionState::Disconnected);
  assert!(client.subscriptions().is_empty());
}
