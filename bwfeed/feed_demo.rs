// feed_demo.rs
// Drives the adapter through the provider scenarios against the scripted feed:
//
//   feed_demo connect
//   feed_demo subscribe --symbol AGQ
//   feed_demo history --bar-type monthly --symbol MSFT
//   feed_demo all

use anyhow::{anyhow, bail, Context, Result};
use bwfeed::conn_mock::{ScriptedBehavior, ScriptedTransport};
use bwfeed::{
  BarType, ClientConfig, ConnectionParameters, FeedClient, HistoricDataRequest, Security, SessionState, Subscribe,
};
use chrono::{TimeZone, Utc};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Exercise the feed adapter against a scripted feed", long_about = None)]
struct Args {
  /// Scenario to run: connect, disconnect, subscribe, history or all.
  scenario: String,

  /// XML parameter file. Built-in test parameters are used when omitted.
  #[clap(long)]
  params: Option<PathBuf>,

  /// Symbol for subscribe/history scenarios.
  #[clap(long, default_value = "MSFT")]
  symbol: String,

  /// Bar type for the history scenario (daily, intraday, monthly).
  #[clap(long, default_value = "daily")]
  bar_type: String,

  /// Deliver history in chunks of this many bars.
  #[clap(long)]
  chunk_size: Option<usize>,

  /// Seconds to wait for each notification.
  #[clap(long, default_value_t = 30)]
  wait_secs: u64,
}

fn load_params(args: &Args) -> Result<ConnectionParameters> {
  match &args.params {
    Some(path) => ConnectionParameters::from_xml_file(path)
      .with_context(|| format!("loading {}", path.display())),
    None => Ok(ConnectionParameters::new("35TEST", "123456", "72.5.42.156", 5000, 5300)?),
  }
}

fn new_client(args: &Args) -> Result<Arc<FeedClient>> {
  let transport = ScriptedTransport::new(ScriptedBehavior {
    history_chunk_size: args.chunk_size,
    ..ScriptedBehavior::default()
  });
  Ok(Arc::new(FeedClient::new(load_params(args)?, Box::new(transport), ClientConfig::default())))
}

fn wait<T>(rx: &Receiver<T>, what: &str, timeout: Duration) -> Result<T> {
  rx.recv_timeout(timeout).map_err(|_| anyhow!("no {} within {:?}", what, timeout))
}

fn connect_scenario(args: &Args, timeout: Duration) -> Result<()> {
  info!("--- Connect ---");
  let client = new_client(args)?;
  let (tx, rx) = unbounded();
  client.add_logon_observer(move |provider| { tx.send(provider.to_string())?; Ok(()) });
  client.start()?;
  let provider = wait(&rx, "logon", timeout)?;
  info!("Logon arrived from {}", provider);
  Ok(())
}

fn disconnect_scenario(args: &Args, timeout: Duration) -> Result<()> {
  info!("--- Disconnect ---");
  let client = new_client(args)?;
  let (tx, rx) = unbounded();
  let c = Arc::downgrade(&client);
  client.add_logon_observer(move |_| {
    if let Some(c) = c.upgrade() {
      c.stop()?;
    }
    Ok(())
  });
  client.add_logout_observer(move |provider| { tx.send(provider.to_string())?; Ok(()) });
  client.start()?;
  let provider = wait(&rx, "logout", timeout)?;
  if client.state() != SessionState::Disconnected {
    bail!("session still {:?} after logout", client.state());
  }
  info!("Logout arrived from {}", provider);
  Ok(())
}

fn subscribe_scenario(args: &Args, timeout: Duration) -> Result<()> {
  info!("--- Subscribe {} ---", args.symbol);
  let client = new_client(args)?;
  let (tx, rx) = unbounded();
  let c = Arc::downgrade(&client);
  let symbol = args.symbol.clone();
  client.add_logon_observer(move |_| {
    if let Some(c) = c.upgrade() {
      c.subscribe_tick_data(&Subscribe::new(&symbol))?;
    }
    Ok(())
  });
  let c = Arc::downgrade(&client);
  client.add_tick_observer(move |tick| {
    tx.send(tick.clone())?;
    if let Some(c) = c.upgrade() {
      c.stop()?;
    }
    Ok(())
  });
  client.start()?;
  let tick = wait(&rx, "tick", timeout)?;
  info!("Tick arrived: {} @ {} x {}", tick.security, tick.last_price, tick.last_size);
  Ok(())
}

fn history_scenario(args: &Args, bar_type: BarType, timeout: Duration) -> Result<()> {
  info!("--- {} history for {} ---", bar_type, args.symbol);
  let client = new_client(args)?;
  let request = HistoricDataRequest::new(
    "1", Security::new(&args.symbol), bar_type, 1,
    Utc.with_ymd_and_hms(2015, 7, 15, 0, 0, 0).single().context("start date")?,
    Utc.with_ymd_and_hms(2015, 7, 26, 0, 0, 0).single().context("end date")?,
  );
  let (tx, rx) = unbounded();
  let c = Arc::downgrade(&client);
  client.add_logon_observer(move |_| {
    if let Some(c) = c.upgrade() {
      c.historic_bar_data_request(request.clone())?;
    }
    Ok(())
  });
  client.add_historic_bar_data_observer(move |data| { tx.send(data.clone())?; Ok(()) });
  client.add_request_failed_observer(|failure| {
    error!("Request {} failed: {}", failure.request_id, failure.error);
    Ok(())
  });
  client.start()?;
  let data = wait(&rx, "historical data", timeout)?;
  info!("Request {} answered with {} bars", data.request_id, data.bars.len());
  if let (Some(first), Some(last)) = (data.bars.first(), data.bars.last()) {
    info!("  first {} close {:.2}, last {} close {:.2}", first.time, first.close, last.time, last.close);
  }
  client.stop()?;
  Ok(())
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
  let args = Args::parse();
  let timeout = Duration::from_secs(args.wait_secs);

  match args.scenario.as_str() {
    "connect" => connect_scenario(&args, timeout),
    "disconnect" => disconnect_scenario(&args, timeout),
    "subscribe" => subscribe_scenario(&args, timeout),
    "history" => {
      let bar_type: BarType = args.bar_type.parse()?;
      history_scenario(&args, bar_type, timeout)
    }
    "all" => {
      connect_scenario(&args, timeout)?;
      disconnect_scenario(&args, timeout)?;
      subscribe_scenario(&args, timeout)?;
      for bar_type in [BarType::Daily, BarType::Intraday, BarType::Monthly] {
        history_scenario(&args, bar_type, timeout)?;
      }
      info!("All scenarios passed");
      Ok(())
    }
    other => bail!("unknown scenario '{}'", other),
  }
}
