//! Race cache
//!
//! Progress replaces wholesale; runner entries are replaced whole by id.

use std::collections::HashMap;

use super::resource::{Race, Resource};
use super::StreamCache;
use crate::error::Result;
use crate::parser::{RaceChange, RaceProgress, RaceRunnerChange};

#[derive(Debug, Clone)]
pub struct RaceCache {
    market_id: String,
    race_id: Option<String>,
    publish_time: u64,
    rpc: Option<RaceProgress>,
    rrc: Vec<RaceRunnerChange>,
    runner_index: HashMap<u64, usize>,
}

impl RaceCache {
    pub fn new(market_id: &str, race_id: Option<String>, publish_time: u64) -> Self {
        Self {
            market_id: market_id.to_string(),
            race_id,
            publish_time,
            rpc: None,
            rrc: Vec::new(),
            runner_index: HashMap::new(),
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn race_id(&self) -> Option<&str> {
        self.race_id.as_deref()
    }

    pub fn progress(&self) -> Option<&RaceProgress> {
        self.rpc.as_ref()
    }

    pub fn runner(&self, selection_id: u64) -> Option<&RaceRunnerChange> {
        self.runner_index.get(&selection_id).map(|&idx| &self.rrc[idx])
    }
}

impl StreamCache for RaceCache {
    type Change = RaceChange;

    const NAME: &'static str = "race";

    fn entity_id(change: &RaceChange) -> &str {
        &change.mid
    }

    fn is_image(_change: &RaceChange) -> bool {
        false
    }

    fn create(change: &RaceChange, publish_time: u64, _known: bool) -> Result<Self> {
        Ok(Self::new(&change.mid, change.id.clone(), publish_time))
    }

    fn update_cache(&mut self, change: RaceChange, publish_time: u64) {
        self.publish_time = publish_time;
        if change.id.is_some() {
            self.race_id = change.id;
        }

        if let Some(rpc) = change.rpc {
            self.rpc = Some(rpc);
        }

        for runner in change.rrc.unwrap_or_default() {
            match self.runner_index.get(&runner.id) {
                Some(&idx) => self.rrc[idx] = runner,
                None => {
                    self.runner_index.insert(runner.id, self.rrc.len());
                    self.rrc.push(runner);
                }
            }
        }
    }

    fn publish_time(&self) -> u64 {
        self.publish_time
    }

    /// Race data carries no lifecycle status, so races are never evicted
    fn closed(&self) -> bool {
        false
    }

    fn create_resource(&self, unique_id: u32, lightweight: bool, snap: bool) -> Result<Resource> {
        let race = Race {
            market_id: self.market_id.clone(),
            race_id: self.race_id.clone(),
            publish_time: self.publish_time,
            rpc: self.rpc.clone(),
            rrc: self.rrc.clone(),
            streaming_unique_id: unique_id,
            streaming_snap: snap,
        };
        Resource::build(race, lightweight, Resource::Race)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(value: serde_json::Value) -> RaceChange {
        serde_json::from_value(value).unwrap()
    }

    fn build(value: serde_json::Value) -> RaceCache {
        let change = change(value);
        let mut cache = RaceCache::create(&change, 1, false).unwrap();
        cache.update_cache(change, 1);
        cache
    }

    #[test]
    fn test_progress_replaced_wholesale() {
        let mut cache = build(json!({"mid": "1.1", "id": "r1", "rpc": {"g": "1f", "st": 10.4, "spd": 17.8}}));
        cache.update_cache(change(json!({"mid": "1.1", "rpc": {"g": "2f"}})), 2);

        let rpc = cache.progress().unwrap();
        assert_eq!(rpc.g.as_deref(), Some("2f"));
        assert!(rpc.st.is_none());
        assert!(rpc.spd.is_none());
        assert_eq!(cache.race_id(), Some("r1"));
    }

    #[test]
    fn test_runner_replaced_whole_by_id() {
        let mut cache = build(json!({"mid": "1.1", "rrc": [
            {"id": 7, "lat": 51.4, "long": -0.4, "spd": 17.8},
            {"id": 8, "lat": 51.5}
        ]}));
        cache.update_cache(change(json!({"mid": "1.1", "rrc": [{"id": 7, "prg": 100.0}]})), 2);

        let runner = cache.runner(7).unwrap();
        assert_eq!(runner.prg, Some(100.0));
        assert!(runner.lat.is_none());
        assert_eq!(cache.runner(8).unwrap().lat, Some(51.5));
    }

    #[test]
    fn test_never_closed() {
        let cache = build(json!({"mid": "1.1"}));
        assert!(!cache.closed());
    }

    #[test]
    fn test_race_resource() {
        let cache = build(json!({"mid": "1.1", "id": "r1", "rrc": [{"id": 7, "spd": 17.8}]}));
        let value = cache.create_resource(2, true, false).unwrap().to_value().unwrap();
        assert_eq!(value["marketId"], "1.1");
        assert_eq!(value["raceId"], "r1");
        assert_eq!(value["rrc"], json!([{"id": 7, "spd": 17.8}]));
        assert_eq!(value["streamingUniqueId"], 2);
    }
}
