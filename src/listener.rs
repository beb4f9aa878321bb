//! Frame dispatcher
//!
//! The listener parses every inbound frame, handles connection and status
//! control messages, and routes change messages to the one stream registered
//! for their kind. All mutation happens on the read loop while it holds the
//! write side of the `SharedListener` lock; `snap` only needs the read side.
//! Batches are handed to the output queue by `dispatch` after the write lock
//! is released, so a full bounded queue never holds up `snap`.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{Resource, StreamCache};
use crate::metrics;
use crate::parser::{ChangeMessage, ChangeType, ConnectionMessage, ErrorCode, ParsedMessage, StatusMessage};
use crate::publisher::{Batch, Publisher};
use crate::stream::{MarketStream, OrderStream, RaceStream, Stream, StreamSettings, SubscriptionKind};

/// Listener shared between the read loop and snapshot readers
pub type SharedListener = Arc<RwLock<Listener>>;

/// What the read loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Continue,
    /// The server closed the connection, with the reported failure reason
    Stop(Option<ErrorCode>),
}

/// Outcome of one frame: the action plus the batches it produced
#[derive(Debug)]
pub struct Dispatch {
    pub action: ListenerAction,
    pub batches: Vec<Batch>,
}

/// Handle one frame on a shared listener. The write lock covers cache
/// mutation only; batches are published once it has been released.
pub fn dispatch(listener: &SharedListener, raw: &str) -> ListenerAction {
    let (publisher, outcome) = {
        let mut guard = listener.write();
        let outcome = guard.receive(raw);
        (guard.publisher.clone(), outcome)
    };
    for batch in outcome.batches {
        publisher.publish(batch);
    }
    outcome.action
}

pub struct Listener {
    publisher: Publisher,
    settings: StreamSettings,
    connection_id: Option<String>,
    /// Degraded-service status from the last change message
    status: Option<u16>,
    connections_available: Option<i64>,
    /// Change messages routed to a registered stream
    accepted_changes: u64,
    market_stream: Option<MarketStream>,
    order_stream: Option<OrderStream>,
    race_stream: Option<RaceStream>,
}

impl Listener {
    pub fn new(publisher: Publisher, settings: StreamSettings) -> Self {
        Self {
            publisher,
            settings,
            connection_id: None,
            status: None,
            connections_available: None,
            accepted_changes: 0,
            market_stream: None,
            order_stream: None,
            race_stream: None,
        }
    }

    pub fn into_shared(self) -> SharedListener {
        Arc::new(RwLock::new(self))
    }

    /// Register a fresh stream, replacing any stream of the same kind
    pub fn register_stream(&mut self, unique_id: u32, kind: SubscriptionKind) {
        let settings = self.settings.clone();
        match kind {
            SubscriptionKind::Market => replace_stream(&mut self.market_stream, unique_id, settings),
            SubscriptionKind::Order => replace_stream(&mut self.order_stream, unique_id, settings),
            SubscriptionKind::Race => replace_stream(&mut self.race_stream, unique_id, settings),
        }
    }

    /// Keep an existing stream (caches and resume tokens) under a new id,
    /// or register one if none exists
    pub fn resume_stream(&mut self, unique_id: u32, kind: SubscriptionKind) {
        if self.has_stream(kind) {
            self.update_unique_id(kind, unique_id);
        } else {
            self.register_stream(unique_id, kind);
        }
    }

    pub fn update_unique_id(&mut self, kind: SubscriptionKind, unique_id: u32) {
        info!(kind = %kind, unique_id, "Updating stream unique id");
        match kind {
            SubscriptionKind::Market => {
                if let Some(stream) = self.market_stream.as_mut() {
                    stream.set_unique_id(unique_id);
                }
            }
            SubscriptionKind::Order => {
                if let Some(stream) = self.order_stream.as_mut() {
                    stream.set_unique_id(unique_id);
                }
            }
            SubscriptionKind::Race => {
                if let Some(stream) = self.race_stream.as_mut() {
                    stream.set_unique_id(unique_id);
                }
            }
        }
    }

    /// Handle one frame and publish its batches straight away. Blocks while a
    /// bounded queue is full; behind a `SharedListener` use `dispatch`.
    pub fn on_data(&mut self, raw: &str) -> ListenerAction {
        let outcome = self.receive(raw);
        for batch in outcome.batches {
            self.publisher.publish(batch);
        }
        outcome.action
    }

    /// Handle one frame, returning its batches instead of publishing them
    pub fn receive(&mut self, raw: &str) -> Dispatch {
        let action = self.handle(raw);
        let mut batches = Vec::new();
        if let Some(stream) = self.market_stream.as_mut() {
            batches.extend(stream.take_batches());
        }
        if let Some(stream) = self.order_stream.as_mut() {
            batches.extend(stream.take_batches());
        }
        if let Some(stream) = self.race_stream.as_mut() {
            batches.extend(stream.take_batches());
        }
        Dispatch { action, batches }
    }

    fn handle(&mut self, raw: &str) -> ListenerAction {
        metrics::frame_received();

        let message = match ParsedMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                metrics::frame_rejected();
                error!(error = %e, "Unable to process frame");
                return ListenerAction::Continue;
            }
        };

        let accepted = match message {
            ParsedMessage::Connection(msg) => {
                self.on_connection(msg);
                return ListenerAction::Continue;
            }
            ParsedMessage::Status(msg) => return self.on_status(msg),
            ParsedMessage::Mcm(msg) => on_change_message(&mut self.market_stream, &mut self.status, msg),
            ParsedMessage::Ocm(msg) => on_change_message(&mut self.order_stream, &mut self.status, msg),
            ParsedMessage::Rcm(msg) => on_change_message(&mut self.race_stream, &mut self.status, msg),
        };
        if accepted {
            self.accepted_changes += 1;
        }
        ListenerAction::Continue
    }

    fn on_connection(&mut self, msg: ConnectionMessage) {
        info!(connection_id = ?msg.connection_id, "Connected");
        self.connection_id = msg.connection_id;
    }

    fn on_status(&mut self, msg: StatusMessage) -> ListenerAction {
        if msg.connections_available.is_some() {
            self.connections_available = msg.connections_available;
        }
        if msg.connection_id.is_some() {
            self.connection_id = msg.connection_id.clone();
        }

        if msg.is_failure() {
            error!(
                id = ?msg.id,
                error_code = ?msg.error_code,
                error_message = ?msg.error_message,
                connection_closed = msg.connection_closed,
                "Subscription failure"
            );
            if msg.connection_closed {
                return ListenerAction::Stop(msg.error_code);
            }
            return ListenerAction::Continue;
        }

        info!(
            id = ?msg.id,
            status_code = ?msg.status_code,
            connections_available = ?self.connections_available,
            "Status"
        );
        ListenerAction::Continue
    }

    /// Mark every stream stopped
    pub fn stop(&mut self) {
        if let Some(stream) = self.market_stream.as_mut() {
            stream.stop();
        }
        if let Some(stream) = self.order_stream.as_mut() {
            stream.stop();
        }
        if let Some(stream) = self.race_stream.as_mut() {
            stream.stop();
        }
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn connections_available(&self) -> Option<i64> {
        self.connections_available
    }

    /// Change messages accepted by a stream so far; growth shows the server
    /// is serving the subscription
    pub fn accepted_changes(&self) -> u64 {
        self.accepted_changes
    }

    pub fn market_stream(&self) -> Option<&MarketStream> {
        self.market_stream.as_ref()
    }

    pub fn order_stream(&self) -> Option<&OrderStream> {
        self.order_stream.as_ref()
    }

    pub fn race_stream(&self) -> Option<&RaceStream> {
        self.race_stream.as_ref()
    }

    pub fn has_stream(&self, kind: SubscriptionKind) -> bool {
        match kind {
            SubscriptionKind::Market => self.market_stream.is_some(),
            SubscriptionKind::Order => self.order_stream.is_some(),
            SubscriptionKind::Race => self.race_stream.is_some(),
        }
    }

    pub fn unique_id(&self, kind: SubscriptionKind) -> Option<u32> {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().map(Stream::unique_id),
            SubscriptionKind::Order => self.order_stream.as_ref().map(Stream::unique_id),
            SubscriptionKind::Race => self.race_stream.as_ref().map(Stream::unique_id),
        }
    }

    pub fn initial_clk(&self, kind: SubscriptionKind) -> Option<String> {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().and_then(|s| s.initial_clk().map(str::to_string)),
            SubscriptionKind::Order => self.order_stream.as_ref().and_then(|s| s.initial_clk().map(str::to_string)),
            SubscriptionKind::Race => self.race_stream.as_ref().and_then(|s| s.initial_clk().map(str::to_string)),
        }
    }

    pub fn clk(&self, kind: SubscriptionKind) -> Option<String> {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().and_then(|s| s.clk().map(str::to_string)),
            SubscriptionKind::Order => self.order_stream.as_ref().and_then(|s| s.clk().map(str::to_string)),
            SubscriptionKind::Race => self.race_stream.as_ref().and_then(|s| s.clk().map(str::to_string)),
        }
    }

    pub fn updates_processed(&self, kind: SubscriptionKind) -> u64 {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().map_or(0, Stream::updates_processed),
            SubscriptionKind::Order => self.order_stream.as_ref().map_or(0, Stream::updates_processed),
            SubscriptionKind::Race => self.race_stream.as_ref().map_or(0, Stream::updates_processed),
        }
    }

    pub fn cache_count(&self, kind: SubscriptionKind) -> usize {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().map_or(0, Stream::len),
            SubscriptionKind::Order => self.order_stream.as_ref().map_or(0, Stream::len),
            SubscriptionKind::Race => self.race_stream.as_ref().map_or(0, Stream::len),
        }
    }

    /// Point-in-time resources of one stream
    pub fn snap(&self, kind: SubscriptionKind, ids: Option<&[String]>) -> Vec<Resource> {
        match kind {
            SubscriptionKind::Market => self.market_stream.as_ref().map(|s| s.snap(ids)),
            SubscriptionKind::Order => self.order_stream.as_ref().map(|s| s.snap(ids)),
            SubscriptionKind::Race => self.race_stream.as_ref().map(|s| s.snap(ids)),
        }
        .unwrap_or_default()
    }
}

fn replace_stream<C: StreamCache>(
    slot: &mut Option<Stream<C>>,
    unique_id: u32,
    settings: StreamSettings,
) {
    if let Some(previous) = slot.as_ref() {
        warn!(
            kind = C::NAME,
            previous_id = previous.unique_id(),
            unique_id,
            "Replacing existing stream"
        );
    }
    *slot = Some(Stream::new(unique_id, settings));
}

/// Route a change message to its stream; false when it was not accepted
fn on_change_message<C: StreamCache>(
    slot: &mut Option<Stream<C>>,
    status: &mut Option<u16>,
    msg: ChangeMessage<C::Change>,
) -> bool {
    let Some(stream) = slot.as_mut() else {
        warn!(kind = C::NAME, id = ?msg.id, "No stream registered, change message dropped");
        return false;
    };

    // frames without an id come from recorded files and are accepted
    if let Some(id) = msg.id {
        if id != stream.unique_id() {
            warn!(kind = C::NAME, id, unique_id = stream.unique_id(), "Unwanted data received");
            return false;
        }
    }

    match msg.status {
        Some(code) => {
            warn!(kind = C::NAME, status = code, "Stream degraded, updates resume once healthy");
            *status = Some(code);
        }
        None => {
            if status.take().is_some() {
                info!(kind = C::NAME, "Stream status recovered");
            }
        }
    }

    debug!(kind = C::NAME, ct = ?msg.ct, pt = msg.pt, "Change message");
    match msg.ct {
        ChangeType::SubImage => stream.on_subscribe(msg),
        ChangeType::ResubDelta => stream.on_resubscribe(msg),
        ChangeType::Heartbeat => stream.on_heartbeat(msg),
        ChangeType::Update => stream.on_update(msg),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{Batch, OutputQueue};
    use crossbeam::channel::Receiver;

    fn listener() -> (Listener, Receiver<Batch>) {
        let (publisher, receiver) = OutputQueue::unbounded();
        (Listener::new(publisher, StreamSettings::default()), receiver)
    }

    #[test]
    fn test_connection_captured() {
        let (mut listener, _rx) = listener();
        let action = listener.on_data(r#"{"op":"connection","connectionId":"002-1"}"#);
        assert_eq!(action, ListenerAction::Continue);
        assert_eq!(listener.connection_id(), Some("002-1"));
    }

    #[test]
    fn test_malformed_frame_continues() {
        let (mut listener, _rx) = listener();
        assert_eq!(listener.on_data("not json"), ListenerAction::Continue);
        assert_eq!(listener.on_data(r#"{"op":"unknown"}"#), ListenerAction::Continue);
    }

    #[test]
    fn test_status_failure_with_close_stops() {
        let (mut listener, _rx) = listener();
        let action = listener.on_data(
            r#"{"op":"status","id":1,"statusCode":"FAILURE","errorCode":"NO_SESSION","connectionClosed":true}"#,
        );
        assert_eq!(action, ListenerAction::Stop(Some(ErrorCode::NoSession)));
    }

    #[test]
    fn test_status_failure_without_close_continues() {
        let (mut listener, _rx) = listener();
        let action = listener.on_data(
            r#"{"op":"status","id":1,"statusCode":"FAILURE","errorCode":"SUBSCRIPTION_LIMIT_EXCEEDED","connectionClosed":false}"#,
        );
        assert_eq!(action, ListenerAction::Continue);
    }

    #[test]
    fn test_status_success_records_connections() {
        let (mut listener, _rx) = listener();
        listener.on_data(r#"{"op":"status","id":1,"statusCode":"SUCCESS","connectionsAvailable":9}"#);
        assert_eq!(listener.connections_available(), Some(9));
    }

    #[test]
    fn test_register_replaces_stream() {
        let (mut listener, _rx) = listener();
        listener.register_stream(1, SubscriptionKind::Market);
        listener.on_data(
            r#"{"op":"mcm","id":1,"ct":"SUB_IMAGE","pt":1,"clk":"A",
                "mc":[{"id":"1.1","img":true,"marketDefinition":{"status":"OPEN","runners":[]}}]}"#,
        );
        assert_eq!(listener.cache_count(SubscriptionKind::Market), 1);

        listener.register_stream(2, SubscriptionKind::Market);
        assert_eq!(listener.unique_id(SubscriptionKind::Market), Some(2));
        assert_eq!(listener.cache_count(SubscriptionKind::Market), 0);
        assert!(listener.clk(SubscriptionKind::Market).is_none());
    }

    #[test]
    fn test_resume_keeps_caches() {
        let (mut listener, _rx) = listener();
        listener.register_stream(1, SubscriptionKind::Market);
        listener.on_data(
            r#"{"op":"mcm","id":1,"ct":"SUB_IMAGE","pt":1,"clk":"A","initialClk":"I",
                "mc":[{"id":"1.1","img":true,"marketDefinition":{"status":"OPEN","runners":[]}}]}"#,
        );

        listener.resume_stream(5, SubscriptionKind::Market);
        assert_eq!(listener.unique_id(SubscriptionKind::Market), Some(5));
        assert_eq!(listener.cache_count(SubscriptionKind::Market), 1);
        assert_eq!(listener.clk(SubscriptionKind::Market).as_deref(), Some("A"));
        assert_eq!(listener.initial_clk(SubscriptionKind::Market).as_deref(), Some("I"));

        listener.resume_stream(6, SubscriptionKind::Order);
        assert_eq!(listener.unique_id(SubscriptionKind::Order), Some(6));
    }

    #[test]
    fn test_unwanted_id_ignored() {
        let (mut listener, rx) = listener();
        listener.register_stream(1, SubscriptionKind::Market);
        listener.on_data(
            r#"{"op":"mcm","id":7,"ct":"SUB_IMAGE","pt":1,"clk":"A",
                "mc":[{"id":"1.1","img":true,"marketDefinition":{"status":"OPEN","runners":[]}}]}"#,
        );
        assert_eq!(listener.cache_count(SubscriptionKind::Market), 0);
        assert!(listener.clk(SubscriptionKind::Market).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_degraded_status_recorded_and_cleared() {
        let (mut listener, _rx) = listener();
        listener.register_stream(1, SubscriptionKind::Order);
        listener.on_data(r#"{"op":"ocm","id":1,"pt":1,"status":503}"#);
        assert_eq!(listener.status(), Some(503));

        listener.on_data(r#"{"op":"ocm","id":1,"pt":2,"ct":"HEARTBEAT","clk":"B"}"#);
        assert_eq!(listener.status(), None);
        assert_eq!(listener.clk(SubscriptionKind::Order).as_deref(), Some("B"));
    }

    #[test]
    fn test_change_without_stream_dropped() {
        let (mut listener, rx) = listener();
        let action = listener.on_data(r#"{"op":"rcm","id":1,"pt":1,"rc":[{"mid":"1.1"}]}"#);
        assert_eq!(action, ListenerAction::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snap_through_shared_lock() {
        let (mut listener, _rx) = listener();
        listener.register_stream(3, SubscriptionKind::Race);
        listener.on_data(r#"{"op":"rcm","id":3,"pt":1,"rc":[{"mid":"1.1","id":"r"},{"mid":"1.2"}]}"#);

        let shared = listener.into_shared();
        let reader = shared.clone();
        let snap = std::thread::spawn(move || reader.read().snap(SubscriptionKind::Race, None))
            .join()
            .unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(shared.read().updates_processed(SubscriptionKind::Race), 2);
        assert!(shared.read().snap(SubscriptionKind::Market, None).is_empty());
    }

    #[test]
    fn test_receive_defers_publishing() {
        let (mut listener, rx) = listener();
        listener.register_stream(1, SubscriptionKind::Market);
        let outcome = listener.receive(
            r#"{"op":"mcm","id":1,"ct":"SUB_IMAGE","pt":1,"clk":"A",
                "mc":[{"id":"1.1","img":true,"marketDefinition":{"status":"OPEN","runners":[]}}]}"#,
        );
        assert_eq!(outcome.action, ListenerAction::Continue);
        assert_eq!(outcome.batches.len(), 1);
        assert!(rx.try_recv().is_err());

        let shared = listener.into_shared();
        dispatch(&shared, r#"{"op":"mcm","id":1,"pt":2,"mc":[{"id":"1.1","tv":3}]}"#);
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[test]
    fn test_accepted_changes_counted() {
        let (mut listener, _rx) = listener();
        listener.register_stream(1, SubscriptionKind::Market);
        listener.on_data(r#"{"op":"connection","connectionId":"002-1"}"#);
        listener.on_data(r#"{"op":"status","id":1,"statusCode":"SUCCESS"}"#);
        listener.on_data(r#"{"op":"status","id":2,"statusCode":"FAILURE","errorCode":"INVALID_APP_KEY"}"#);
        listener.on_data(r#"{"op":"mcm","id":9,"ct":"HEARTBEAT","pt":1}"#);
        listener.on_data(r#"{"op":"ocm","id":1,"ct":"HEARTBEAT","pt":1}"#);
        assert_eq!(listener.accepted_changes(), 0);

        listener.on_data(r#"{"op":"mcm","id":1,"ct":"HEARTBEAT","pt":1,"clk":"A"}"#);
        assert_eq!(listener.accepted_changes(), 1);
    }
}
