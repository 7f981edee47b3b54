// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use dacc_registry::RegistryOptions;

use crate::facade::Timeouts;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub etcd_endpoints: Vec<String>,
}

/// Fake local devices a host reports as bricks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub pool_name: String,
    pub count: u32,
    pub capacity_gb: u64,
    /// Device name with `%d` replaced by the device index
    pub pattern: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pool_name: "default".to_string(),
            count: 12,
            capacity_gb: 1600,
            pattern: "nvme%dn1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Overrides the system hostname when set
    pub hostname: Option<String>,
    pub store: StoreConfig,
    pub keepalive_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub action_timeout_secs: u64,
    pub state_timeout_secs: u64,
    pub devices: DeviceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            store: StoreConfig::default(),
            keepalive_ttl_secs: 10,
            lock_ttl_secs: 30,
            action_timeout_secs: 600,
            state_timeout_secs: 600,
            devices: DeviceConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Read `path` (or `DACC_CONFIG`) if given, then apply environment
    /// overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var("DACC_CONFIG").ok();
        let path = path.map(Path::to_path_buf).or_else(|| from_env.map(Into::into));

        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoints) = lookup("DACC_ETCD_ENDPOINTS") {
            self.store.etcd_endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
            if !self.store.etcd_endpoints.is_empty() {
                self.store.backend = StoreBackend::Etcd;
            }
        }
        if let Some(hostname) = lookup("DACC_HOSTNAME").filter(|h| !h.is_empty()) {
            self.hostname = Some(hostname);
        }
        if let Some(pool) = lookup("DACC_POOL_NAME") {
            self.devices.pool_name = pool;
        }
        if let Some(pattern) = lookup("DACC_DEVICE_PATTERN") {
            self.devices.pattern = pattern;
        }

        let number = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .with_context(|| format!("{key} must be a whole number, got {raw:?}"))
                })
                .transpose()
        };
        if let Some(v) = number("DACC_KEEPALIVE_TTL_SECS")? {
            self.keepalive_ttl_secs = v;
        }
        if let Some(v) = number("DACC_LOCK_TTL_SECS")? {
            self.lock_ttl_secs = v;
        }
        if let Some(v) = number("DACC_ACTION_TIMEOUT_SECS")? {
            self.action_timeout_secs = v;
        }
        if let Some(v) = number("DACC_STATE_TIMEOUT_SECS")? {
            self.state_timeout_secs = v;
        }
        if let Some(v) = number("DACC_DEVICE_COUNT")? {
            self.devices.count = u32::try_from(v).context("DACC_DEVICE_COUNT is too large")?;
        }
        if let Some(v) = number("DACC_DEVICE_CAPACITY_GB")? {
            self.devices.capacity_gb = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.keepalive_ttl_secs == 0 || self.lock_ttl_secs == 0 {
            bail!("lease TTLs must be at least one second");
        }
        if self.store.backend == StoreBackend::Etcd && self.store.etcd_endpoints.is_empty() {
            bail!("etcd backend selected without any endpoints");
        }
        Ok(())
    }

    pub fn hostname(&self) -> Result<String> {
        if let Some(hostname) = &self.hostname {
            return Ok(hostname.clone());
        }
        let hostname = nix::unistd::gethostname().context("reading system hostname")?;
        hostname
            .into_string()
            .map_err(|raw| anyhow::anyhow!("hostname is not valid UTF-8: {raw:?}"))
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            keepalive_ttl: Duration::from_secs(self.keepalive_ttl_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
        }
    }

    /// Lock waits share the action timeout
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            lock: Duration::from_secs(self.action_timeout_secs),
            action: Duration::from_secs(self.action_timeout_secs),
            state: Duration::from_secs(self.state_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.keepalive_ttl_secs, 10);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.devices.count, 12);
        assert_eq!(config.devices.capacity_gb, 1600);
        assert_eq!(config.devices.pattern, "nvme%dn1");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            hostname = "dac1"

            [devices]
            count = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.hostname.as_deref(), Some("dac1"));
        assert_eq!(config.devices.count, 4);
        assert_eq!(config.devices.pool_name, "default");
        assert_eq!(config.action_timeout_secs, 600);
    }

    #[test]
    fn etcd_endpoints_select_the_etcd_backend() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(env(&[("DACC_ETCD_ENDPOINTS", "http://a:2379, http://b:2379")]))
            .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Etcd);
        assert_eq!(config.store.etcd_endpoints, vec!["http://a:2379", "http://b:2379"]);
    }

    #[test]
    fn numeric_overrides_are_validated() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(env(&[("DACC_DEVICE_COUNT", "3"), ("DACC_STATE_TIMEOUT_SECS", "5")]))
            .unwrap();
        assert_eq!(config.devices.count, 3);
        assert_eq!(config.timeouts().state, Duration::from_secs(5));

        let err = config
            .apply_env(env(&[("DACC_LOCK_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("DACC_LOCK_TTL_SECS"));
    }

    #[test]
    fn hostname_override_wins() {
        let mut config = ServiceConfig::default();
        config.apply_env(env(&[("DACC_HOSTNAME", "dac7")])).unwrap();
        assert_eq!(config.hostname().unwrap(), "dac7");
    }
}
