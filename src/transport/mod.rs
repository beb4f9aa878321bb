//! Transport module for the stream API connection

pub mod client;
pub mod framing;
mod manager;

pub use client::{AsyncStream, StreamClient};
pub use manager::StreamManager;
