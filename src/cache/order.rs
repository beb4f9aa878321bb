//! Order book cache
//!
//! Mirrors the account's own orders on one market: matched ladders per
//! runner plus unmatched orders keyed by bet id.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::available::Available;
use super::resource::{utc_from_millis, CurrentOrder, CurrentOrders, Resource, RunnerMatches};
use super::{LadderOrder, PriceSize, RunnerKey, StreamCache};
use crate::error::Result;
use crate::parser::{OrderChange, OrderMarketChange, OrderRunnerChange};

/// One own order, always replaced whole
#[derive(Debug, Clone, PartialEq)]
pub struct UnmatchedOrder {
    order: OrderChange,
}

impl UnmatchedOrder {
    pub fn new(order: OrderChange) -> Self {
        Self { order }
    }

    pub fn bet_id(&self) -> &str {
        &self.order.id
    }

    pub fn order(&self) -> &OrderChange {
        &self.order
    }

    pub fn serialise(&self, market_id: &str, key: RunnerKey) -> CurrentOrder {
        let order = &self.order;
        CurrentOrder {
            bet_id: order.id.clone(),
            market_id: market_id.to_string(),
            selection_id: key.selection_id,
            handicap: key.handicap,
            price_size: PriceSize {
                price: order.p,
                size: order.s,
            },
            bsp_liability: order.bsp,
            side: order.side,
            status: order.status,
            persistence_type: order.pt,
            order_type: order.ot,
            placed_date: utc_from_millis(order.pd),
            matched_date: order.md.and_then(utc_from_millis),
            lapsed_date: order.ld.and_then(utc_from_millis),
            cancelled_date: order.cd.and_then(utc_from_millis),
            average_price_matched: order.avp.unwrap_or_default(),
            size_matched: order.sm,
            size_remaining: order.sr,
            size_lapsed: order.sl,
            size_cancelled: order.sc,
            size_voided: order.sv,
            regulator_auth_code: order.rac.clone(),
            regulator_code: order.rc.clone(),
            customer_order_ref: order.rfo.clone(),
            customer_strategy_ref: order.rfs.clone(),
            lapse_status_reason_code: order.lsrc.clone(),
        }
    }
}

/// Own-order state for one runner
#[derive(Debug, Clone)]
pub struct OrderBookRunner {
    key: RunnerKey,
    matched_backs: Available,
    matched_lays: Available,
    /// Insertion ordered, indexed by bet id
    unmatched_orders: Vec<UnmatchedOrder>,
    order_index: HashMap<String, usize>,
}

impl OrderBookRunner {
    pub fn new(change: &OrderRunnerChange) -> Self {
        let mut runner = Self {
            key: RunnerKey::new(change.id, change.hc),
            matched_backs: Available::full(&[], LadderOrder::Descending),
            matched_lays: Available::full(&[], LadderOrder::Ascending),
            unmatched_orders: Vec::new(),
            order_index: HashMap::new(),
        };
        runner.update(change);
        runner
    }

    pub fn key(&self) -> RunnerKey {
        self.key
    }

    pub fn update(&mut self, change: &OrderRunnerChange) {
        if let Some(mb) = &change.mb {
            self.matched_backs.update(mb);
        }
        if let Some(ml) = &change.ml {
            self.matched_lays.update(ml);
        }
        if let Some(uo) = &change.uo {
            self.update_unmatched(uo);
        }
    }

    /// Upsert orders by bet id
    pub fn update_unmatched(&mut self, orders: &[OrderChange]) {
        for order in orders {
            match self.order_index.get(&order.id) {
                Some(&idx) => self.unmatched_orders[idx] = UnmatchedOrder::new(order.clone()),
                None => {
                    self.order_index.insert(order.id.clone(), self.unmatched_orders.len());
                    self.unmatched_orders.push(UnmatchedOrder::new(order.clone()));
                }
            }
        }
    }

    pub fn unmatched_orders(&self) -> &[UnmatchedOrder] {
        &self.unmatched_orders
    }

    pub fn order(&self, bet_id: &str) -> Option<&UnmatchedOrder> {
        self.order_index.get(bet_id).map(|&idx| &self.unmatched_orders[idx])
    }

    pub fn matched_backs(&self) -> &[PriceSize] {
        self.matched_backs.serialised()
    }

    pub fn matched_lays(&self) -> &[PriceSize] {
        self.matched_lays.serialised()
    }

    fn serialise_matches(&self) -> RunnerMatches {
        RunnerMatches {
            selection_id: self.key.selection_id,
            handicap: self.key.handicap,
            matched_backs: self.matched_backs().to_vec(),
            matched_lays: self.matched_lays().to_vec(),
        }
    }
}

/// Cached own orders on one market
#[derive(Debug, Clone)]
pub struct OrderBookCache {
    market_id: String,
    publish_time: u64,
    closed: bool,
    runners: Vec<OrderBookRunner>,
    runner_index: HashMap<RunnerKey, usize>,
}

impl OrderBookCache {
    pub fn new(market_id: &str, publish_time: u64) -> Self {
        Self {
            market_id: market_id.to_string(),
            publish_time,
            closed: false,
            runners: Vec::new(),
            runner_index: HashMap::new(),
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn runners(&self) -> &[OrderBookRunner] {
        &self.runners
    }

    pub fn runner(&self, selection_id: u64, handicap: Option<Decimal>) -> Option<&OrderBookRunner> {
        self.runner_index
            .get(&RunnerKey::new(selection_id, handicap))
            .map(|&idx| &self.runners[idx])
    }

    fn serialise(&self, unique_id: u32, snap: bool) -> CurrentOrders {
        CurrentOrders {
            market_id: self.market_id.clone(),
            publish_time: self.publish_time,
            closed: self.closed,
            current_orders: self
                .runners
                .iter()
                .flat_map(|runner| {
                    runner
                        .unmatched_orders
                        .iter()
                        .map(move |order| order.serialise(&self.market_id, runner.key))
                })
                .collect(),
            matches: self.runners.iter().map(OrderBookRunner::serialise_matches).collect(),
            more_available: false,
            streaming_unique_id: unique_id,
            streaming_snap: snap,
        }
    }
}

impl StreamCache for OrderBookCache {
    type Change = OrderMarketChange;

    const NAME: &'static str = "order";

    fn entity_id(change: &OrderMarketChange) -> &str {
        &change.id
    }

    fn is_image(change: &OrderMarketChange) -> bool {
        change.full_image
    }

    fn create(change: &OrderMarketChange, publish_time: u64, _known: bool) -> Result<Self> {
        Ok(Self::new(&change.id, publish_time))
    }

    fn update_cache(&mut self, change: OrderMarketChange, publish_time: u64) {
        self.publish_time = publish_time;
        if let Some(closed) = change.closed {
            self.closed = closed;
        }

        for runner_change in change.orc.unwrap_or_default() {
            let key = RunnerKey::new(runner_change.id, runner_change.hc);
            match self.runner_index.get(&key) {
                Some(&idx) if runner_change.full_image => {
                    self.runners[idx] = OrderBookRunner::new(&runner_change);
                }
                Some(&idx) => self.runners[idx].update(&runner_change),
                None => {
                    self.runner_index.insert(key, self.runners.len());
                    self.runners.push(OrderBookRunner::new(&runner_change));
                }
            }
        }
    }

    fn publish_time(&self) -> u64 {
        self.publish_time
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn create_resource(&self, unique_id: u32, lightweight: bool, snap: bool) -> Result<Resource> {
        Resource::build(self.serialise(unique_id, snap), lightweight, Resource::CurrentOrders)
    }
}
