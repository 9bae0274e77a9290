//! Instance selection strategies. A closed set, picked by configured name;
//! unknown names fall back to random selection.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rand::seq::SliceRandom;

use crate::registry::InstanceRecord;

pub enum LoadBalancer {
    Random(RandomBalancer),
    RoundRobin(RoundRobinBalancer),
    Weight(WeightBalancer),
}

impl LoadBalancer {
    /// Strategy names follow the config surface. Anything unrecognized maps
    /// to random selection.
    pub fn from_name(name: &str) -> Self {
        match name {
            "round_robin" => LoadBalancer::RoundRobin(RoundRobinBalancer::new()),
            "weight" => LoadBalancer::Weight(WeightBalancer::new()),
            "random" => LoadBalancer::Random(RandomBalancer::new()),
            other => {
                if !other.is_empty() {
                    tracing::warn!("unknown load balancer '{}', falling back to random", other);
                }
                LoadBalancer::Random(RandomBalancer::new())
            }
        }
    }

    /// Swaps in a complete replacement candidate set. The previous list is
    /// dropped only after the new one is installed, so in-flight selections
    /// keep reading a consistent snapshot.
    pub fn record_change(&self, instances: Vec<InstanceRecord>) {
        match self {
            LoadBalancer::Random(b) => b.instances.store(Arc::new(instances)),
            LoadBalancer::RoundRobin(b) => b.instances.store(Arc::new(instances)),
            LoadBalancer::Weight(b) => b.record_change(instances),
        }
    }

    pub fn select_one(&self) -> Option<InstanceRecord> {
        match self {
            LoadBalancer::Random(b) => b.select_one(),
            LoadBalancer::RoundRobin(b) => b.select_one(),
            LoadBalancer::Weight(b) => b.select_one(),
        }
    }
}

pub struct RandomBalancer {
    instances: ArcSwap<Vec<InstanceRecord>>,
}

impl RandomBalancer {
    fn new() -> Self {
        RandomBalancer {
            instances: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn select_one(&self) -> Option<InstanceRecord> {
        let instances = self.instances.load();
        instances.choose(&mut rand::thread_rng()).cloned()
    }
}

pub struct RoundRobinBalancer {
    instances: ArcSwap<Vec<InstanceRecord>>,
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    fn new() -> Self {
        RoundRobinBalancer {
            instances: ArcSwap::from_pointee(Vec::new()),
            index: AtomicUsize::new(0),
        }
    }

    fn select_one(&self) -> Option<InstanceRecord> {
        let instances = self.instances.load();
        if instances.is_empty() {
            return None;
        }
        // modulo against the size of the snapshot taken on this call; the
        // set may have shrunk since the counter last wrapped
        let current = self.index.fetch_add(1, Ordering::Relaxed) % instances.len();
        instances.get(current).cloned()
    }
}

pub struct WeightBalancer {
    /// Kept sorted by descending weight; ties preserve arrival order.
    records: ArcSwap<Vec<InstanceRecord>>,
}

impl WeightBalancer {
    fn new() -> Self {
        WeightBalancer {
            records: ArcSwap::from_pointee(Vec::new()),
        }
    }

    fn record_change(&self, mut instances: Vec<InstanceRecord>) {
        instances.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(CmpOrdering::Equal)
        });
        self.records.store(Arc::new(instances));
    }

    fn select_one(&self) -> Option<InstanceRecord> {
        self.records.load().first().cloned()
    }
}
