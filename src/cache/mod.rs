//! Delta-merge caches
//!
//! Each cache reconstructs one entity (a market, the own orders on a market,
//! or a race) from an initial image plus a sequence of deltas. Caches are
//! owned by their stream and only mutated from the read loop.

pub mod available;
pub mod market;
pub mod order;
pub mod race;
pub mod resource;

pub use available::Available;
pub use market::{MarketBookCache, RunnerBookCache};
pub use order::{OrderBookCache, OrderBookRunner, UnmatchedOrder};
pub use race::RaceCache;
pub use resource::{CurrentOrders, MarketBook, Race, Resource, RunnerBook};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::Result;

/// Sort direction of a serialized ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderOrder {
    /// Lowest price first: lay side and traded volume
    Ascending,
    /// Highest price first: back side
    Descending,
}

/// A single ladder level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceSize {
    pub price: Decimal,
    pub size: Decimal,
}

/// Runner identity within a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerKey {
    pub selection_id: u64,
    /// Zero unless the market is an asian handicap market
    pub handicap: Decimal,
}

impl RunnerKey {
    pub fn new(selection_id: u64, handicap: Option<Decimal>) -> Self {
        Self {
            selection_id,
            // normalize so that 0 and 0.0 hash alike
            handicap: handicap.unwrap_or_default().normalize(),
        }
    }
}

/// A cache driven by one kind of change-list entry
pub trait StreamCache: Sized {
    /// Change-list entry type
    type Change;

    /// Short entity name used in logs
    const NAME: &'static str;

    /// Entity id the change refers to
    fn entity_id(change: &Self::Change) -> &str;

    /// Whether the change is a full image for its entity
    fn is_image(change: &Self::Change) -> bool;

    /// Build an empty cache for a change. `known` is set when a cache for the
    /// same id already exists and is about to be replaced.
    fn create(change: &Self::Change, publish_time: u64, known: bool) -> Result<Self>;

    /// Merge the fields present in the change
    fn update_cache(&mut self, change: Self::Change, publish_time: u64);

    /// Publish time of the last applied change
    fn publish_time(&self) -> u64;

    /// Closed entities become eligible for eviction
    fn closed(&self) -> bool;

    fn create_resource(&self, unique_id: u32, lightweight: bool, snap: bool) -> Result<Resource>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn test_runner_key_defaults_handicap() {
        assert_eq!(RunnerKey::new(10, None), RunnerKey::new(10, Some(dec!(0))));
        assert_eq!(RunnerKey::new(10, Some(dec!(0.0))), RunnerKey::new(10, Some(dec!(0))));
    }

    #[test]
    fn test_runner_key_distinguishes_handicap_lines() {
        let mut runners = HashMap::new();
        runners.insert(RunnerKey::new(10, Some(dec!(-0.25))), "minus");
        runners.insert(RunnerKey::new(10, Some(dec!(1.25))), "plus");
        runners.insert(RunnerKey::new(10, Some(dec!(1.250))), "plus again");

        assert_eq!(runners.len(), 2);
        assert_eq!(runners[&RunnerKey::new(10, Some(dec!(1.25)))], "plus again");
    }
}
