//! The service-registry capability the resolver is built against. The real
//! discovery client lives outside this crate; anything that can list
//! instances and push change notifications plugs in behind [`Registry`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Deserialize;

/// One resolvable endpoint for a service, as a registry snapshot reports it.
/// A new snapshot always replaces the whole list; records are never mutated
/// in place.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceRecord {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub last_access_time: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Default for InstanceRecord {
    fn default() -> Self {
        InstanceRecord {
            ip: String::new(),
            port: 0,
            weight: 1.0,
            healthy: true,
            enabled: true,
            last_access_time: 0,
            metadata: HashMap::new(),
        }
    }
}

/// Callback invoked with the full replacement instance list whenever the
/// registry pushes a change for a subscribed service.
pub type InstanceListener = Arc<dyn Fn(Vec<InstanceRecord>) + Send + Sync>;

#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Fetches the current instance list for `(service, group)`.
    async fn list_instances(&self, service: &str, group: &str) -> Result<Vec<InstanceRecord>>;

    /// Registers `listener` for push notifications on `(service, group)`.
    async fn subscribe(
        &self,
        service: &str,
        group: &str,
        listener: InstanceListener,
    ) -> Result<()>;
}

/// In-process registry backed by the `services` section of the config file.
/// It keeps the server usable standalone and gives tests a registry whose
/// change pushes they control via [`StaticRegistry::push_update`].
pub struct StaticRegistry {
    services: Mutex<HashMap<(String, String), Vec<InstanceRecord>>>,
    listeners: Mutex<HashMap<(String, String), Vec<InstanceListener>>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        StaticRegistry {
            services: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, service: &str, group: &str, instances: Vec<InstanceRecord>) {
        self.services
            .lock()
            .unwrap()
            .insert(key(service, group), instances);
    }

    /// Replaces the instance list for `(service, group)` and notifies every
    /// subscribed listener with a clone of the new list.
    pub fn push_update(&self, service: &str, group: &str, instances: Vec<InstanceRecord>) {
        let k = key(service, group);
        self.services
            .lock()
            .unwrap()
            .insert(k.clone(), instances.clone());

        let listeners = self.listeners.lock().unwrap();
        if let Some(subscribed) = listeners.get(&k) {
            for listener in subscribed {
                listener(instances.clone());
            }
        }
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Registry for StaticRegistry {
    async fn list_instances(&self, service: &str, group: &str) -> Result<Vec<InstanceRecord>> {
        self.services
            .lock()
            .unwrap()
            .get(&key(service, group))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("service '{}' not found in group '{}'", service, group))
    }

    async fn subscribe(
        &self,
        service: &str,
        group: &str,
        listener: InstanceListener,
    ) -> Result<()> {
        self.listeners
            .lock()
            .unwrap()
            .entry(key(service, group))
            .or_default()
            .push(listener);
        Ok(())
    }
}

fn key(service: &str, group: &str) -> (String, String) {
    (service.to_string(), group.to_string())
}
