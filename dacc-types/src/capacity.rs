// SPDX-License-Identifier: GPL-3.0-only

//! Capacity requests of the form `<pool>:<int><units>`

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// A pool name paired with a size in bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub pool: String,
    pub bytes: u64,
}

impl std::str::FromStr for Capacity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let (pool, size) = value
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid capacity '{}': expected <pool>:<size>", value))?;
        if pool.is_empty() {
            return Err(anyhow!("Invalid capacity '{}': pool name is empty", value));
        }
        Ok(Self {
            pool: pool.to_string(),
            bytes: parse_size(size)?,
        })
    }
}

/// Parse a size such as "1600GB", "2TiB" or "4096" (bytes)
///
/// SI units are decimal, IEC units binary.
pub fn parse_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(anyhow!("Invalid size '{}': missing number", value));
    }
    let number: u64 = digits.parse()?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1000,
        "kib" => 1 << 10,
        "mb" => 1000 * 1000,
        "mib" => 1 << 20,
        "gb" => 1000 * 1000 * 1000,
        "gib" => 1 << 30,
        "tb" => 1000 * 1000 * 1000 * 1000,
        "tib" => 1 << 40,
        other => return Err(anyhow!("Invalid unit: {}", other)),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Size '{}' overflows", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pool_and_binary_units() {
        let capacity: Capacity = "dwcache:2GiB".parse().expect("parse capacity");
        assert_eq!(capacity.pool, "dwcache");
        assert_eq!(capacity.bytes, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn decimal_units_and_bare_bytes() {
        assert_eq!(parse_size("1600GB").expect("GB"), 1_600_000_000_000);
        assert_eq!(parse_size("4096").expect("bytes"), 4096);
        assert_eq!(parse_size("1TiB").expect("TiB"), 1 << 40);
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!("nopool".parse::<Capacity>().is_err());
        assert!(":1GiB".parse::<Capacity>().is_err());
        assert!(parse_size("GiB").is_err());
        assert!(parse_size("12XB").is_err());
    }
}
