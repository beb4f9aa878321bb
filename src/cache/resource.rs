//! Materialized cache output
//!
//! Caches hand these to the output queue. In lightweight mode the same data
//! is emitted as a plain JSON document instead.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use super::PriceSize;
use crate::error::{Result, StreamError};
use crate::parser::{
    MarketDefinition, MarketStatus, OrderSide, OrderStatus, OrderType, PersistenceType, RaceProgress,
    RaceRunnerChange, RunnerStatus,
};

/// One entry of an output batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    /// Lightweight output
    Raw(Value),
    MarketBook(Box<MarketBook>),
    CurrentOrders(CurrentOrders),
    Race(Race),
}

impl Resource {
    /// Wrap a typed resource, or flatten it to JSON in lightweight mode
    pub(crate) fn build<T, F>(typed: T, lightweight: bool, wrap: F) -> Result<Resource>
    where
        T: Serialize,
        F: FnOnce(T) -> Resource,
    {
        if lightweight {
            serde_json::to_value(&typed)
                .map(Resource::Raw)
                .map_err(|e| StreamError::Serialization(e.to_string()))
        } else {
            Ok(wrap(typed))
        }
    }

    /// Market id the resource describes
    pub fn market_id(&self) -> Option<&str> {
        match self {
            Resource::Raw(value) => value.get("marketId").and_then(Value::as_str),
            Resource::MarketBook(book) => Some(&book.market_id),
            Resource::CurrentOrders(orders) => Some(&orders.market_id),
            Resource::Race(race) => Some(&race.market_id),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| StreamError::Serialization(e.to_string()))
    }

    pub fn as_market_book(&self) -> Option<&MarketBook> {
        match self {
            Resource::MarketBook(book) => Some(book),
            _ => None,
        }
    }

    pub fn as_current_orders(&self) -> Option<&CurrentOrders> {
        match self {
            Resource::CurrentOrders(orders) => Some(orders),
            _ => None,
        }
    }

    pub fn as_race(&self) -> Option<&Race> {
        match self {
            Resource::Race(race) => Some(race),
            _ => None,
        }
    }
}

/// Point-in-time view of one market
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBook {
    pub market_id: String,
    pub publish_time: u64,
    pub status: Option<MarketStatus>,
    pub bet_delay: Option<u32>,
    pub version: Option<u64>,
    pub complete: Option<bool>,
    pub runners_voidable: Option<bool>,
    pub total_matched: Option<Decimal>,
    pub bsp_reconciled: Option<bool>,
    pub cross_matching: Option<bool>,
    #[serde(rename = "inplay")]
    pub in_play: Option<bool>,
    pub number_of_winners: Option<u32>,
    pub number_of_runners: usize,
    pub number_of_active_runners: Option<u32>,
    pub price_ladder_definition: Option<Value>,
    pub key_line_description: Option<Value>,
    pub runners: Vec<RunnerBook>,
    pub market_definition: Option<MarketDefinition>,
    pub streaming_unique_id: u32,
    pub streaming_snap: bool,
}

impl MarketBook {
    pub fn runner(&self, selection_id: u64) -> Option<&RunnerBook> {
        self.runners.iter().find(|r| r.selection_id == selection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerBook {
    pub selection_id: u64,
    pub handicap: Decimal,
    pub status: Option<RunnerStatus>,
    pub adjustment_factor: Option<Decimal>,
    pub removal_date: Option<String>,
    pub last_price_traded: Option<Decimal>,
    pub total_matched: Option<Decimal>,
    pub ex: ExchangePrices,
    pub sp: StartingPrices,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePrices {
    pub available_to_back: Vec<PriceSize>,
    pub available_to_lay: Vec<PriceSize>,
    pub traded_volume: Vec<PriceSize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartingPrices {
    pub near_price: Option<f64>,
    pub far_price: Option<f64>,
    pub back_stake_taken: Vec<PriceSize>,
    pub lay_liability_taken: Vec<PriceSize>,
    #[serde(rename = "actualSP")]
    pub actual_sp: Option<f64>,
}

/// Own orders on one market
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOrders {
    pub market_id: String,
    pub publish_time: u64,
    pub closed: bool,
    pub current_orders: Vec<CurrentOrder>,
    pub matches: Vec<RunnerMatches>,
    pub more_available: bool,
    pub streaming_unique_id: u32,
    pub streaming_snap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOrder {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: u64,
    pub handicap: Decimal,
    pub price_size: PriceSize,
    pub bsp_liability: Option<Decimal>,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub persistence_type: Option<PersistenceType>,
    pub order_type: OrderType,
    pub placed_date: Option<DateTime<Utc>>,
    pub matched_date: Option<DateTime<Utc>>,
    pub lapsed_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
    pub average_price_matched: Decimal,
    pub size_matched: Decimal,
    pub size_remaining: Decimal,
    pub size_lapsed: Decimal,
    pub size_cancelled: Decimal,
    pub size_voided: Decimal,
    pub regulator_auth_code: Option<String>,
    pub regulator_code: Option<String>,
    pub customer_order_ref: Option<String>,
    pub customer_strategy_ref: Option<String>,
    pub lapse_status_reason_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerMatches {
    pub selection_id: u64,
    pub handicap: Decimal,
    pub matched_backs: Vec<PriceSize>,
    pub matched_lays: Vec<PriceSize>,
}

/// Race progress for one market
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    pub market_id: String,
    pub race_id: Option<String>,
    pub publish_time: u64,
    pub rpc: Option<RaceProgress>,
    pub rrc: Vec<RaceRunnerChange>,
    pub streaming_unique_id: u32,
    pub streaming_snap: bool,
}

/// Epoch millis to a UTC timestamp
pub(crate) fn utc_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
