//! Exchange Stream - Streaming API Client Library
//!
//! This crate connects to an exchange's streaming API over TLS, keeps
//! subscriptions alive with resume tokens, and reconstructs market books,
//! own orders and race progress from image and delta messages.

pub mod cache;
pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod parser;
pub mod publisher;
pub mod request;
pub mod stream;
pub mod transport;

pub use cache::{Available, MarketBook, MarketBookCache, OrderBookCache, RaceCache, Resource, StreamCache};
pub use config::Config;
pub use error::{Result, StreamError};
pub use listener::{dispatch, Dispatch, Listener, ListenerAction, SharedListener};
pub use parser::{ChangeMessage, ParsedMessage};
pub use publisher::{Batch, OutputQueue, Publisher};
pub use request::{MarketDataFilter, MarketFilter, OrderFilter, RequestMessage, SubscriptionOptions};
pub use stream::{MarketStream, OrderStream, RaceStream, Stream, StreamSettings, StreamState, SubscriptionKind};
pub use transport::{StreamClient, StreamManager};
