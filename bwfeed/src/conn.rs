// bwfeed/src/conn.rs

use crate::base::FeedError;
use crate::config::ConnectionParameters;
use crate::data::{HistoricDataRequest, Security};
use crate::handler::MessageHandler;
use log::{debug, info, trace};

/// Capability interface of the physical connection to the feed.
///
/// Implementations own the socket (or SDK handle) and decode inbound traffic. Decoded
/// events are reported through the `MessageHandler` installed with
/// `set_message_handler`, possibly from several threads. All methods take `&self`: a
/// transport is free to call back into the handler from inside any of them.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
  /// Opens the connection and sends the logon. Logon completion is reported
  /// asynchronously through `MessageHandler::logon`.
  fn connect(&self, params: &ConnectionParameters) -> Result<(), FeedError>;

  /// Sends the logoff and closes the connection. Completion is reported through
  /// `MessageHandler::logout`.
  fn disconnect(&self) -> Result<(), FeedError>;

  fn send_tick_subscription(&self, security: &Security) -> Result<(), FeedError>;

  fn send_tick_unsubscription(&self, security: &Security) -> Result<(), FeedError>;

  fn send_historical_request(&self, request: &HistoricDataRequest) -> Result<(), FeedError>;

  /// Installs the handler for inbound events. Replaces any previous handler.
  fn set_message_handler(&self, handler: MessageHandler);
}

/// Shared front of the transport used by the managers.
///
/// Only the session manager opens and closes the connection; the subscription registry
/// and the historical request tracker only send requests through it.
pub struct MessageBroker {
  transport: Box<dyn Transport>,
}

impl MessageBroker {
  pub fn new(transport: Box<dyn Transport>) -> Self {
    MessageBroker { transport }
  }

  pub(crate) fn connect(&self, params: &ConnectionParameters) -> Result<(), FeedError> {
    info!("Connecting to feed at {} as '{}'", params.server_address(), params.user_name());
    self.transport.connect(params)
  }

  pub(crate) fn disconnect(&self) -> Result<(), FeedError> {
    info!("Disconnecting from feed");
    self.transport.disconnect()
  }

  pub(crate) fn set_message_handler(&self, handler: MessageHandler) {
    debug!("Installing message handler on transport");
    self.transport.set_message_handler(handler);
  }

  pub fn send_tick_subscription(&self, security: &Security) -> Result<(), FeedError> {
    trace!("-> tick subscription {}", security);
    self.transport.send_tick_subscription(security)
  }

  pub fn send_tick_unsubscription(&self, security: &Security) -> Result<(), FeedError> {
    trace!("-> tick unsubscription {}", security);
    self.transport.send_tick_unsubscription(security)
  }

  pub fn send_historical_request(&self, request: &HistoricDataRequest) -> Result<(), FeedError> {
    trace!("-> historical request {} ({} {} x{})", request.id, request.security, request.bar_type, request.interval);
    self.transport.send_historical_request(request)
  }
}
