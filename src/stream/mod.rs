//! Per-subscription stream controller
//!
//! A `Stream` owns the caches of one subscription, keeps the resume tokens,
//! watches feed latency and evicts closed entities once they are old enough.
//! Every processed change message results in exactly one batch. Batches are
//! held until the owner drains them with `take_batches`, so publishing never
//! happens while the stream is borrowed.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{MarketBookCache, OrderBookCache, RaceCache, Resource, StreamCache};
use crate::config::Config;
use crate::metrics;
use crate::parser::ChangeMessage;
use crate::publisher::Batch;

pub type MarketStream = Stream<MarketBookCache>;
pub type OrderStream = Stream<OrderBookCache>;
pub type RaceStream = Stream<RaceCache>;

/// Subscription kinds; at most one stream of each per listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Market,
    Order,
    Race,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Market => write!(f, "market"),
            SubscriptionKind::Order => write!(f, "order"),
            SubscriptionKind::Race => write!(f, "race"),
        }
    }
}

/// Settings shared by every stream of a listener
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Latency above which each update logs a warning
    pub max_latency: Duration,
    /// Publish raw documents instead of typed resources
    pub lightweight: bool,
    /// Feed-time retention of closed caches
    pub max_cache_age_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_millis(500),
            lightweight: false,
            max_cache_age_ms: 8 * 60 * 60 * 1000,
        }
    }
}

impl From<&Config> for StreamSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_latency: config.max_latency(),
            lightweight: config.lightweight,
            max_cache_age_ms: config.max_cache_age_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    /// First image received
    Subscribed,
    Streaming,
    Stopped,
}

pub struct Stream<C: StreamCache> {
    unique_id: u32,
    settings: StreamSettings,
    state: StreamState,
    initial_clk: Option<String>,
    clk: Option<String>,
    caches: BTreeMap<String, C>,
    updates_processed: u64,
    time_created: DateTime<Utc>,
    time_updated: DateTime<Utc>,
    /// Batches processed but not yet handed to the output queue
    pending: Vec<Batch>,
}

impl<C: StreamCache> Stream<C> {
    pub fn new(unique_id: u32, settings: StreamSettings) -> Self {
        let now = Utc::now();
        info!(unique_id, kind = C::NAME, "Stream created");
        Self {
            unique_id,
            settings,
            state: StreamState::Uninitialized,
            initial_clk: None,
            clk: None,
            caches: BTreeMap::new(),
            updates_processed: 0,
            time_created: now,
            time_updated: now,
            pending: Vec::new(),
        }
    }

    /// Initial image after subscribing
    pub fn on_subscribe(&mut self, message: ChangeMessage<C::Change>) {
        self.update_clk(&message);
        log_segment(self.unique_id, &message);

        if let Some(changes) = message.changes {
            self.process(changes, message.pt);
        }
        self.state = StreamState::Subscribed;
        info!(unique_id = self.unique_id, kind = C::NAME, entities = self.caches.len(), "Subscribed, entities added");
    }

    /// Snapshot-as-delta after resubscribing with resume tokens
    pub fn on_resubscribe(&mut self, message: ChangeMessage<C::Change>) {
        info!(unique_id = self.unique_id, kind = C::NAME, "Resubscribed, applying delta");
        self.on_update(message);
    }

    /// Keep-alive: resume tokens only
    pub fn on_heartbeat(&mut self, message: ChangeMessage<C::Change>) {
        self.update_clk(&message);
    }

    pub fn on_update(&mut self, message: ChangeMessage<C::Change>) {
        self.update_clk(&message);
        log_segment(self.unique_id, &message);

        if message.pt > 0 {
            let latency = latency_secs(message.pt, Utc::now());
            metrics::latency(latency);
            if latency > self.settings.max_latency.as_secs_f64() {
                warn!(
                    unique_id = self.unique_id,
                    kind = C::NAME,
                    latency_secs = latency,
                    "High latency between publish time and receipt"
                );
            }
        }

        if let Some(changes) = message.changes {
            if !changes.is_empty() {
                let image = self.process(changes, message.pt);
                if image {
                    self.clear_stale_cache(message.pt);
                }
            }
        }

        if self.state != StreamState::Stopped {
            self.state = StreamState::Streaming;
        }
    }

    /// Drop closed caches whose age exceeds the retention window
    pub fn clear_stale_cache(&mut self, publish_time: u64) {
        let max_age = self.settings.max_cache_age_ms;
        let unique_id = self.unique_id;
        self.caches.retain(|id, cache| {
            let stale = cache.closed() && publish_time.saturating_sub(cache.publish_time()) > max_age;
            if stale {
                info!(unique_id, kind = C::NAME, id = %id, "Removing stale cache");
            }
            !stale
        });
    }

    pub fn clear_cache(&mut self) {
        self.caches.clear();
    }

    /// Resources for all cached entities, or for the listed ids only
    pub fn snap(&self, ids: Option<&[String]>) -> Vec<Resource> {
        self.caches
            .iter()
            .filter(|(id, _)| ids.map_or(true, |ids| ids.contains(id)))
            .filter_map(|(id, cache)| {
                match cache.create_resource(self.unique_id, self.settings.lightweight, true) {
                    Ok(resource) => Some(resource),
                    Err(e) => {
                        error!(unique_id = self.unique_id, id = %id, error = %e, "Unable to snap cache");
                        None
                    }
                }
            })
            .collect()
    }

    /// Apply a change list and queue the touched entities as one batch.
    /// Returns true when any entry created or replaced a cache.
    pub fn process(&mut self, changes: Vec<C::Change>, publish_time: u64) -> bool {
        let mut image = false;
        let mut batch = Vec::with_capacity(changes.len());
        let count = changes.len();

        for change in changes {
            let id = C::entity_id(&change).to_string();
            let known = self.caches.contains_key(&id);

            if !known || C::is_image(&change) {
                match C::create(&change, publish_time, known) {
                    Ok(cache) => {
                        if known {
                            info!(unique_id = self.unique_id, kind = C::NAME, id = %id, "Replacing cache from image");
                        } else {
                            info!(unique_id = self.unique_id, kind = C::NAME, id = %id, "Creating cache");
                        }
                        self.caches.insert(id.clone(), cache);
                        image = true;
                    }
                    Err(e) => {
                        error!(unique_id = self.unique_id, kind = C::NAME, id = %id, error = %e, "Unable to create cache");
                        continue;
                    }
                }
            }

            if let Some(cache) = self.caches.get_mut(&id) {
                cache.update_cache(change, publish_time);
                self.updates_processed += 1;
                match cache.create_resource(self.unique_id, self.settings.lightweight, false) {
                    Ok(resource) => batch.push(resource),
                    Err(e) => error!(unique_id = self.unique_id, id = %id, error = %e, "Unable to create resource"),
                }
            }
        }

        metrics::updates_processed(C::NAME, count);
        self.pending.push(batch);
        image
    }

    pub fn stop(&mut self) {
        if self.state != StreamState::Stopped {
            info!(unique_id = self.unique_id, kind = C::NAME, "Stream stopped");
        }
        self.state = StreamState::Stopped;
    }

    fn update_clk(&mut self, message: &ChangeMessage<C::Change>) {
        if let Some(initial_clk) = message.initial_clk.as_ref().filter(|c| !c.is_empty()) {
            self.initial_clk = Some(initial_clk.clone());
        }
        if let Some(clk) = message.clk.as_ref().filter(|c| !c.is_empty()) {
            self.clk = Some(clk.clone());
        }
        self.time_updated = Utc::now();
    }

    /// Batches produced since the last call, oldest first
    pub fn take_batches(&mut self) -> Vec<Batch> {
        std::mem::take(&mut self.pending)
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    pub fn set_unique_id(&mut self, unique_id: u32) {
        self.unique_id = unique_id;
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn initial_clk(&self) -> Option<&str> {
        self.initial_clk.as_deref()
    }

    pub fn clk(&self) -> Option<&str> {
        self.clk.as_deref()
    }

    pub fn updates_processed(&self) -> u64 {
        self.updates_processed
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.time_created
    }

    pub fn time_updated(&self) -> DateTime<Utc> {
        self.time_updated
    }

    pub fn cache(&self, id: &str) -> Option<&C> {
        self.caches.get(id)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

fn log_segment<T>(unique_id: u32, message: &ChangeMessage<T>) {
    if message.segment_type.is_some() || message.con.is_some() {
        debug!(
            unique_id,
            segment_type = ?message.segment_type,
            conflated = ?message.con,
            "Segmented or conflated change message"
        );
    }
}

/// Seconds between publish time and `now`
fn latency_secs(publish_time: u64, now: DateTime<Utc>) -> f64 {
    (now.timestamp_millis() - publish_time as i64) as f64 / 1e3
}
