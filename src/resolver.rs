//! Per-name resolution cache. Each queried name owns one load balancer bound
//! to the registry's current instance list for that name.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use moka::sync::Cache;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::balancer::LoadBalancer;
use crate::config::ResolverConfig;
use crate::registry::{InstanceListener, InstanceRecord, Registry};

/// Cache keys are service+group qualified: `"{group}@@{service}"`. The same
/// service queried under two groups resolves independently.
fn cache_key(service: &str, group: &str) -> String {
    format!("{}@@{}", group, service)
}

struct CacheEntry {
    balancer: LoadBalancer,
    /// Set once the initial registry fetch succeeded. Concurrent first
    /// lookups collapse onto a single fetch here; a failed fetch leaves the
    /// cell empty so a later lookup retries.
    fetched: OnceCell<()>,
}

pub struct ResolutionCache {
    entries: Cache<String, Arc<CacheEntry>>,
    /// Ordered pattern table; the first full match decides the group.
    group_matches: RwLock<Vec<(Regex, String)>>,
    default_group: String,
    balancer_name: String,
    registry: Arc<dyn Registry>,
}

impl ResolutionCache {
    pub fn new(
        balancer_name: &str,
        config: &ResolverConfig,
        registry: Arc<dyn Registry>,
    ) -> Result<Self> {
        let mut group_matches = Vec::with_capacity(config.service_group_match.len());
        for m in &config.service_group_match {
            // the table uses whole-name matching, not substring search
            let pattern = Regex::new(&format!("^(?:{})$", m.pattern))
                .map_err(|e| anyhow::anyhow!("invalid service pattern '{}': {}", m.pattern, e))?;
            group_matches.push((pattern, m.group.clone()));
        }

        Ok(ResolutionCache {
            entries: Cache::builder().max_capacity(10_000).build(),
            group_matches: RwLock::new(group_matches),
            default_group: config.default_group.clone(),
            balancer_name: balancer_name.to_string(),
            registry,
        })
    }

    /// Resolves a queried name to one instance, or `None` when the registry
    /// does not own the name (the caller then falls through to the backend).
    pub async fn resolve(&self, domain: &str) -> Option<InstanceRecord> {
        let service = domain.strip_suffix('.').unwrap_or(domain);
        let group = self.group_for(service);

        let entry = self
            .entries
            .entry(cache_key(service, &group))
            .or_insert_with(|| {
                Arc::new(CacheEntry {
                    balancer: LoadBalancer::from_name(&self.balancer_name),
                    fetched: OnceCell::new(),
                })
            })
            .into_value();

        let fetched = entry
            .fetched
            .get_or_try_init(|| self.fetch_and_subscribe(service, &group, &entry))
            .await;

        if let Err(err) = fetched {
            warn!(
                "querying the registry for '{}' in group '{}' failed: {:#}",
                service, group, err
            );
            return None;
        }
        entry.balancer.select_one()
    }

    async fn fetch_and_subscribe(
        &self,
        service: &str,
        group: &str,
        entry: &Arc<CacheEntry>,
    ) -> Result<()> {
        let instances = self.registry.list_instances(service, group).await?;
        debug!(
            "registry returned {} instance(s) for '{}' in group '{}'",
            instances.len(),
            service,
            group
        );
        entry.balancer.record_change(instances);

        // a push replaces the whole backing set behind the entry's balancer;
        // the weak reference lets evicted entries die without unsubscribing
        let weak = Arc::downgrade(entry);
        let listener: InstanceListener = Arc::new(move |instances| {
            if let Some(entry) = weak.upgrade() {
                entry.balancer.record_change(instances);
            }
        });
        if let Err(err) = self.registry.subscribe(service, group, listener).await {
            warn!(
                "subscribing to instance changes for '{}' failed: {:#}",
                service, err
            );
        }
        Ok(())
    }

    fn group_for(&self, service: &str) -> String {
        let matches = self.group_matches.read().unwrap();
        for (pattern, group) in matches.iter() {
            if pattern.is_match(service) {
                return group.clone();
            }
        }
        self.default_group.clone()
    }

    pub fn shutdown(&self) {
        self.entries.invalidate_all();
        self.group_matches.write().unwrap().clear();
    }
}
