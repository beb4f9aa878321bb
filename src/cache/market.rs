//! Market book cache
//!
//! Reconstructs a market from its definition, the aggregate traded volume
//! and per-runner price data. Runners are keyed by `(selection_id, handicap)`
//! and kept in first-seen order.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::available::Available;
use super::resource::{ExchangePrices, MarketBook, Resource, RunnerBook, StartingPrices};
use super::{LadderOrder, PriceSize, RunnerKey, StreamCache};
use crate::error::{Result, StreamError};
use crate::parser::{MarketChange, MarketDefinition, MarketStatus, RunnerChange, RunnerDefinition};

/// Price data for one runner
#[derive(Debug, Clone)]
pub struct RunnerBookCache {
    key: RunnerKey,
    last_price_traded: Option<Decimal>,
    total_matched: Option<Decimal>,
    traded: Available,
    available_to_back: Available,
    best_available_to_back: Available,
    best_display_available_to_back: Available,
    available_to_lay: Available,
    best_available_to_lay: Available,
    best_display_available_to_lay: Available,
    starting_price_back: Available,
    starting_price_lay: Available,
    starting_price_near: Option<f64>,
    starting_price_far: Option<f64>,
}

impl RunnerBookCache {
    /// Empty runner, typically created from a definition entry
    pub fn new(key: RunnerKey) -> Self {
        Self {
            key,
            last_price_traded: None,
            total_matched: None,
            traded: Available::full(&[], LadderOrder::Ascending),
            available_to_back: Available::full(&[], LadderOrder::Descending),
            best_available_to_back: Available::levels(&[], LadderOrder::Descending),
            best_display_available_to_back: Available::levels(&[], LadderOrder::Descending),
            available_to_lay: Available::full(&[], LadderOrder::Ascending),
            best_available_to_lay: Available::levels(&[], LadderOrder::Ascending),
            best_display_available_to_lay: Available::levels(&[], LadderOrder::Ascending),
            starting_price_back: Available::full(&[], LadderOrder::Descending),
            starting_price_lay: Available::full(&[], LadderOrder::Ascending),
            starting_price_near: None,
            starting_price_far: None,
        }
    }

    /// Runner initialized from its first change entry
    pub fn from_change(change: &RunnerChange) -> Self {
        let mut runner = Self::new(RunnerKey::new(change.id, change.hc));
        runner.update(change);
        runner
    }

    pub fn key(&self) -> RunnerKey {
        self.key
    }

    /// Apply only the fields present in the change
    pub fn update(&mut self, change: &RunnerChange) {
        if let Some(ltp) = change.ltp {
            self.last_price_traded = Some(ltp);
        }
        // a removed runner reports tv 0
        if let Some(tv) = change.tv {
            self.total_matched = Some(tv);
        }
        if let Some(spn) = change.spn {
            self.starting_price_near = Some(spn);
        }
        if let Some(spf) = change.spf {
            self.starting_price_far = Some(spf);
        }
        if let Some(trd) = &change.trd {
            if trd.is_empty() {
                self.traded.clear();
            } else {
                self.traded.update(trd);
            }
        }

        let ladders = [
            (&change.atb, &mut self.available_to_back),
            (&change.atl, &mut self.available_to_lay),
            (&change.batb, &mut self.best_available_to_back),
            (&change.batl, &mut self.best_available_to_lay),
            (&change.bdatb, &mut self.best_display_available_to_back),
            (&change.bdatl, &mut self.best_display_available_to_lay),
            (&change.spb, &mut self.starting_price_back),
            (&change.spl, &mut self.starting_price_lay),
        ];
        for (rows, ladder) in ladders {
            if let Some(rows) = rows {
                ladder.update(rows);
            }
        }
    }

    /// Full depth wins, then virtual depth, then best-N depth
    fn preferred<'a>(full: &'a Available, display: &'a Available, best: &'a Available) -> &'a [PriceSize] {
        if !full.is_empty() {
            full.serialised()
        } else if !display.is_empty() {
            display.serialised()
        } else {
            best.serialised()
        }
    }

    pub fn available_to_back(&self) -> &[PriceSize] {
        Self::preferred(
            &self.available_to_back,
            &self.best_display_available_to_back,
            &self.best_available_to_back,
        )
    }

    pub fn available_to_lay(&self) -> &[PriceSize] {
        Self::preferred(
            &self.available_to_lay,
            &self.best_display_available_to_lay,
            &self.best_available_to_lay,
        )
    }

    pub fn traded(&self) -> &[PriceSize] {
        self.traded.serialised()
    }

    pub fn serialise(&self, definition: Option<&RunnerDefinition>) -> RunnerBook {
        RunnerBook {
            selection_id: self.key.selection_id,
            handicap: self.key.handicap,
            status: definition.and_then(|d| d.status),
            adjustment_factor: definition.and_then(|d| d.adjustment_factor),
            removal_date: definition.and_then(|d| d.removal_date.clone()),
            last_price_traded: self.last_price_traded,
            total_matched: self.total_matched,
            ex: ExchangePrices {
                available_to_back: self.available_to_back().to_vec(),
                available_to_lay: self.available_to_lay().to_vec(),
                traded_volume: self.traded().to_vec(),
            },
            sp: StartingPrices {
                near_price: self.starting_price_near,
                far_price: self.starting_price_far,
                back_stake_taken: self.starting_price_lay.serialised().to_vec(),
                lay_liability_taken: self.starting_price_back.serialised().to_vec(),
                actual_sp: definition.and_then(|d| d.bsp),
            },
        }
    }
}

/// Cached state of one market
#[derive(Debug, Clone)]
pub struct MarketBookCache {
    market_id: String,
    publish_time: u64,
    total_matched: Option<Decimal>,
    market_definition: Option<MarketDefinition>,
    /// Definition entries by runner key
    runner_definitions: HashMap<RunnerKey, RunnerDefinition>,
    runners: Vec<RunnerBookCache>,
    runner_index: HashMap<RunnerKey, usize>,
}

impl MarketBookCache {
    pub fn new(market_id: &str, publish_time: u64) -> Self {
        Self {
            market_id: market_id.to_string(),
            publish_time,
            total_matched: None,
            market_definition: None,
            runner_definitions: HashMap::new(),
            runners: Vec::new(),
            runner_index: HashMap::new(),
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn market_definition(&self) -> Option<&MarketDefinition> {
        self.market_definition.as_ref()
    }

    pub fn total_matched(&self) -> Option<Decimal> {
        self.total_matched
    }

    pub fn runners(&self) -> &[RunnerBookCache] {
        &self.runners
    }

    pub fn runner(&self, selection_id: u64, handicap: Option<Decimal>) -> Option<&RunnerBookCache> {
        self.runner_index
            .get(&RunnerKey::new(selection_id, handicap))
            .map(|&idx| &self.runners[idx])
    }

    pub fn status(&self) -> Option<MarketStatus> {
        self.market_definition.as_ref().and_then(|d| d.status)
    }

    fn process_market_definition(&mut self, definition: MarketDefinition) {
        self.runner_definitions = definition
            .runners
            .iter()
            .map(|r| (RunnerKey::new(r.id, r.hc), r.clone()))
            .collect();

        // runners named by the definition exist even before any price data
        for runner in &definition.runners {
            let key = RunnerKey::new(runner.id, runner.hc);
            if !self.runner_index.contains_key(&key) {
                self.add_runner(RunnerBookCache::new(key));
            }
        }
        self.market_definition = Some(definition);
    }

    fn add_runner(&mut self, runner: RunnerBookCache) {
        debug!(market_id = %self.market_id, selection_id = runner.key.selection_id, handicap = %runner.key.handicap, "Adding runner");
        self.runner_index.insert(runner.key, self.runners.len());
        self.runners.push(runner);
    }

    fn serialise(&self, unique_id: u32, snap: bool) -> MarketBook {
        let definition = self.market_definition.as_ref();
        MarketBook {
            market_id: self.market_id.clone(),
            publish_time: self.publish_time,
            status: definition.and_then(|d| d.status),
            bet_delay: definition.and_then(|d| d.bet_delay),
            version: definition.and_then(|d| d.version),
            complete: definition.and_then(|d| d.complete),
            runners_voidable: definition.and_then(|d| d.runners_voidable),
            total_matched: self.total_matched,
            bsp_reconciled: definition.and_then(|d| d.bsp_reconciled),
            cross_matching: definition.and_then(|d| d.cross_matching),
            in_play: definition.and_then(|d| d.in_play),
            number_of_winners: definition.and_then(|d| d.number_of_winners),
            number_of_runners: self.runners.len(),
            number_of_active_runners: definition.and_then(|d| d.number_of_active_runners),
            price_ladder_definition: definition.and_then(|d| d.price_ladder_definition.clone()),
            key_line_description: definition.and_then(|d| d.key_line_definition.clone()),
            runners: self
                .runners
                .iter()
                .map(|r| r.serialise(self.runner_definitions.get(&r.key)))
                .collect(),
            market_definition: self.market_definition.clone(),
            streaming_unique_id: unique_id,
            streaming_snap: snap,
        }
    }
}

impl StreamCache for MarketBookCache {
    type Change = MarketChange;

    const NAME: &'static str = "market";

    fn entity_id(change: &MarketChange) -> &str {
        &change.id
    }

    fn is_image(change: &MarketChange) -> bool {
        change.img
    }

    fn create(change: &MarketChange, publish_time: u64, known: bool) -> Result<Self> {
        if change.market_definition.is_none() {
            if !known {
                return Err(StreamError::Cache(format!(
                    "market {} has no marketDefinition on first sight, subscribe with EX_MARKET_DEF",
                    change.id
                )));
            }
            warn!(market_id = %change.id, "Image without marketDefinition, book will lack runner status");
        }
        Ok(Self::new(&change.id, publish_time))
    }

    fn update_cache(&mut self, change: MarketChange, publish_time: u64) {
        self.publish_time = publish_time;

        if let Some(definition) = change.market_definition {
            self.process_market_definition(definition);
        }

        if let Some(tv) = change.tv {
            self.total_matched = Some(tv);
        }

        for runner_change in change.rc.unwrap_or_default() {
            let key = RunnerKey::new(runner_change.id, runner_change.hc);
            match self.runner_index.get(&key) {
                Some(&idx) => self.runners[idx].update(&runner_change),
                None => self.add_runner(RunnerBookCache::from_change(&runner_change)),
            }
        }
    }

    fn publish_time(&self) -> u64 {
        self.publish_time
    }

    fn closed(&self) -> bool {
        self.status() == Some(MarketStatus::Closed)
    }

    fn create_resource(&self, unique_id: u32, lightweight: bool, snap: bool) -> Result<Resource> {
        Resource::build(self.serialise(unique_id, snap), lightweight, |book| {
            Resource::MarketBook(Box::new(book))
        })
    }
}
