//! Endpoint-level routing over time series.
//!
//! A store maps endpoints to shards, one shard per endpoint, each holding
//! the per-metric series. Shards are shared between consecutive store
//! generations by reference: a fleet change builds the next generation from
//! the current one, so history survives the swap without copying. Shard
//! state has its own locks, which makes holding one shard from two store
//! generations during the handoff safe.

use crate::domain::entities::Endpoint;
use crate::domain::ports::Appender;
use crate::domain::value_objects::{MetricId, MetricSample, MetricValue, Record};
use crate::store::page_queue::PageQueue;
use crate::store::timeseries::{AddOutcome, TimeSeries};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-endpoint bundle of time series, shared between store generations.
struct EndpointShard {
    by_metric: DashMap<MetricId, Arc<TimeSeries>>,
}

impl EndpointShard {
    fn new() -> Self {
        Self {
            by_metric: DashMap::new(),
        }
    }
}

/// One endpoint's slot in one store generation. The shard (the data) is
/// shared with other generations; the active flag belongs to this
/// generation alone, so flipping it while building the next generation
/// cannot be observed through the current one.
struct ShardEntry {
    shard: Arc<EndpointShard>,
    active: AtomicBool,
}

/// One generation of the time-series store.
///
/// The set of endpoints a store serves is decided when the registry builds
/// it; everyday traffic only touches shard interiors. The endpoint map is
/// read-mostly, so queries on distinct endpoints do not contend.
pub struct Store {
    queue: Arc<PageQueue>,
    shards: DashMap<Endpoint, ShardEntry>,
}

impl Store {
    /// Create an empty store drawing pages from `queue`.
    pub fn new(queue: Arc<PageQueue>) -> Self {
        Self {
            queue,
            shards: DashMap::new(),
        }
    }

    /// The page pool backing this store.
    pub fn page_queue(&self) -> &Arc<PageQueue> {
        &self.queue
    }

    /// Start the next store generation, sharing every shard with this one.
    /// Active flags are copied, not shared, so the two generations diverge
    /// from here on.
    pub fn next_generation(&self) -> Store {
        let shards = DashMap::with_capacity(self.shards.len());
        for entry in self.shards.iter() {
            shards.insert(
                entry.key().clone(),
                ShardEntry {
                    shard: Arc::clone(&entry.shard),
                    active: AtomicBool::new(entry.active.load(Ordering::Acquire)),
                },
            );
        }
        Store {
            queue: self.queue.clone(),
            shards,
        }
    }

    /// Prepare the shard for `endpoint`. Idempotent.
    pub fn register_endpoint(&self, endpoint: &Endpoint) {
        self.shards.entry(endpoint.clone()).or_insert_with(|| ShardEntry {
            shard: Arc::new(EndpointShard::new()),
            active: AtomicBool::new(true),
        });
    }

    /// True when the store holds this endpoint, active or not.
    pub fn has_endpoint(&self, endpoint: &Endpoint) -> bool {
        self.shards.contains_key(endpoint)
    }

    /// True when this generation holds the endpoint's series as active.
    pub fn is_endpoint_active(&self, endpoint: &Endpoint) -> bool {
        self.shards
            .get(endpoint)
            .map(|entry| entry.active.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// All endpoints this store holds, in no particular order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.shards.iter().map(|e| e.key().clone()).collect()
    }

    /// Route one batch of samples taken at `timestamp` to the endpoint's
    /// series, creating series as needed. Returns how many samples differed
    /// from their series' previous value; a series' first sample counts as
    /// a difference.
    ///
    /// # Panics
    ///
    /// Panics when `endpoint` was never registered with this store, which
    /// is a poller using an endpoint it did not get from the registry.
    pub fn add_batch(&self, endpoint: &Endpoint, timestamp: f64, samples: &[MetricSample]) -> usize {
        let shard = match self.shards.get(endpoint) {
            Some(entry) => Arc::clone(&entry.shard),
            None => panic!("add_batch: unknown endpoint {endpoint}"),
        };

        let mut changed = 0;
        for sample in samples {
            let series = Arc::clone(
                &shard
                    .by_metric
                    .entry(sample.id.clone())
                    .or_insert_with(|| TimeSeries::new(sample.id.clone(), self.queue.clone())),
            );
            if series.add(timestamp, MetricValue::Number(sample.value)) == AddOutcome::Changed {
                changed += 1;
            }
        }
        changed
    }

    /// Snapshot of the newest record of every series under `endpoint`.
    pub fn latest_by_endpoint(&self, endpoint: &Endpoint) -> Vec<(MetricId, Record)> {
        let Some(shard) = self.shards.get(endpoint).map(|e| Arc::clone(&e.shard)) else {
            return Vec::new();
        };
        shard
            .by_metric
            .iter()
            .filter_map(|entry| entry.value().latest().map(|r| (entry.key().clone(), r)))
            .collect()
    }

    /// Range query, newest first, over every series named `name` under
    /// `endpoint`.
    pub fn by_name_and_endpoint(
        &self,
        name: &str,
        endpoint: &Endpoint,
        start: f64,
        end: f64,
        out: &mut dyn Appender,
    ) {
        for series in self.series_named(name, endpoint) {
            series.fetch(start, end, out);
        }
    }

    /// Range query, oldest first, over every series named `name` under
    /// `endpoint`.
    pub fn fetch_forward_by_name_and_endpoint(
        &self,
        name: &str,
        endpoint: &Endpoint,
        start: f64,
        end: f64,
        out: &mut dyn Appender,
    ) {
        for series in self.series_named(name, endpoint) {
            series.fetch_forward(start, end, out);
        }
    }

    fn series_named(&self, name: &str, endpoint: &Endpoint) -> Vec<Arc<TimeSeries>> {
        let Some(shard) = self.shards.get(endpoint).map(|e| Arc::clone(&e.shard)) else {
            return Vec::new();
        };
        shard
            .by_metric
            .iter()
            .filter(|entry| entry.key().name == name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Terminate every active series under `endpoint` at `timestamp` and
    /// clear this generation's active flag. The history stays queryable.
    pub fn mark_endpoint_inactive(&self, timestamp: f64, endpoint: &Endpoint) {
        let Some(shard) = self.shards.get(endpoint).map(|e| {
            e.active.store(false, Ordering::Release);
            Arc::clone(&e.shard)
        }) else {
            return;
        };
        for entry in shard.by_metric.iter() {
            entry.value().mark_inactive(timestamp);
        }
    }

    /// Reopen `endpoint`'s series after it rejoined the fleet.
    pub fn mark_endpoint_active(&self, endpoint: &Endpoint) {
        let Some(shard) = self.shards.get(endpoint).map(|e| {
            e.active.store(true, Ordering::Release);
            Arc::clone(&e.shard)
        }) else {
            return;
        };
        for entry in shard.by_metric.iter() {
            entry.value().mark_active();
        }
    }
}
