// SPDX-License-Identifier: GPL-3.0-only

use dacc_types::BrickInfo;

use crate::config::DeviceConfig;

const BYTES_PER_GB: u64 = 1_000_000_000;

/// Local devices a host offers as bricks, generated from a name pattern
#[derive(Debug, Clone)]
pub struct DeviceEnumerator {
    config: DeviceConfig,
}

impl DeviceEnumerator {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    pub fn devices(&self) -> Vec<String> {
        (0..self.config.count)
            .map(|i| self.config.pattern.replace("%d", &i.to_string()))
            .collect()
    }

    pub fn bricks(&self, hostname: &str) -> Vec<BrickInfo> {
        let capacity_bytes = self.config.capacity_gb.saturating_mul(BYTES_PER_GB);
        self.devices()
            .into_iter()
            .map(|device| BrickInfo {
                device,
                hostname: hostname.to_string(),
                pool_name: self.config.pool_name.clone(),
                capacity_bytes,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_expanded_per_device() {
        let enumerator = DeviceEnumerator::new(DeviceConfig {
            count: 3,
            ..Default::default()
        });
        assert_eq!(enumerator.devices(), vec!["nvme0n1", "nvme1n1", "nvme2n1"]);
    }

    #[test]
    fn bricks_carry_host_pool_and_capacity() {
        let enumerator = DeviceEnumerator::new(DeviceConfig {
            pool_name: "pool1".to_string(),
            count: 2,
            capacity_gb: 2,
            pattern: "loop%d".to_string(),
        });
        let bricks = enumerator.bricks("dac1");
        assert_eq!(bricks.len(), 2);
        assert_eq!(bricks[1].device, "loop1");
        assert_eq!(bricks[1].hostname, "dac1");
        assert_eq!(bricks[1].pool_name, "pool1");
        assert_eq!(bricks[1].capacity_bytes, 2_000_000_000);
    }
}
