//! YAML configuration surface for the server.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::registry::InstanceRecord;

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the DNS socket binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Receive/encode buffer size per datagram.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Backend DNS server consulted for names the registry does not own.
    /// A bare host gets the standard port 53 appended.
    pub backend_dns: String,

    /// Strategy name: "random", "round_robin" or "weight".
    #[serde(default = "default_balancer")]
    pub load_balancer: String,

    /// Answer AAAA instead of A when an instance address is IPv6.
    #[serde(default)]
    pub prefer_ipv6: bool,

    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Statically registered services, served without an external registry.
    #[serde(default)]
    pub services: Vec<StaticService>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    #[serde(default = "default_group")]
    pub default_group: String,

    /// Ordered pattern table mapping service names to registry groups; the
    /// first full match wins.
    #[serde(default)]
    pub service_group_match: Vec<GroupMatch>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            default_group: DEFAULT_GROUP.to_string(),
            service_group_match: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupMatch {
    pub pattern: String,
    pub group: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticService {
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context("invalid configuration")?;
        Ok(config)
    }

    /// Backend address with the DNS port applied when none was given.
    pub fn backend_addr(&self) -> String {
        if self.backend_dns.contains(':') {
            self.backend_dns.clone()
        } else {
            format!("{}:53", self.backend_dns)
        }
    }

    /// Flattens the static service entries into (service, group, instances)
    /// tuples for seeding a registry.
    pub fn static_services(&self) -> Vec<(String, String, Vec<InstanceRecord>)> {
        self.services
            .iter()
            .map(|s| (s.name.clone(), s.group.clone(), s.instances.clone()))
            .collect()
    }
}

fn default_listen() -> String {
    "0.0.0.0:53".to_string()
}

fn default_buffer_size() -> usize {
    4096
}

fn default_balancer() -> String {
    "random".to_string()
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let config = Config::parse("backend_dns: 8.8.8.8").unwrap();
        assert_eq!(config.listen, "0.0.0.0:53");
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.load_balancer, "random");
        assert!(!config.prefer_ipv6);
        assert_eq!(config.backend_addr(), "8.8.8.8:53");
        assert_eq!(config.resolver.default_group, DEFAULT_GROUP);
        assert!(config.services.is_empty());
    }

    #[test]
    fn full_config_round_trips() {
        let yaml = r#"
listen: "127.0.0.1:5353"
buffer_size: 1232
backend_dns: "192.168.1.1:5300"
load_balancer: round_robin
prefer_ipv6: true
resolver:
  default_group: apps
  service_group_match:
    - pattern: 'svc1\..*'
      group: infra
services:
  - name: svc1.group1
    group: infra
    instances:
      - ip: 10.0.0.5
        port: 8080
        weight: 2.5
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5353");
        assert_eq!(config.buffer_size, 1232);
        assert_eq!(config.backend_addr(), "192.168.1.1:5300");
        assert_eq!(config.load_balancer, "round_robin");
        assert!(config.prefer_ipv6);
        assert_eq!(config.resolver.service_group_match[0].group, "infra");

        let services = config.static_services();
        assert_eq!(services.len(), 1);
        let (name, group, instances) = &services[0];
        assert_eq!(name, "svc1.group1");
        assert_eq!(group, "infra");
        assert_eq!(instances[0].weight, 2.5);
        assert!(instances[0].healthy);
        assert!(instances[0].enabled);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::parse("backend_dns: 8.8.8.8\nzone_transfer: yes").is_err());
    }

    #[test]
    fn missing_backend_is_an_error() {
        assert!(Config::parse("listen: 0.0.0.0:53").is_err());
    }
}
