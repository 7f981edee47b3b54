// SPDX-License-Identifier: GPL-3.0-only

//! Brick types
//!
//! A brick is one physical storage device. Hosts report their bricks as
//! `BrickInfo`; the allocator works on the slimmer `Brick`, and the
//! assignment of a brick to a volume is tracked as a `BrickAllocation`.

use serde::{Deserialize, Serialize};

/// A brick as reported by the host that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickInfo {
    /// Device name on the host (e.g., "nvme3n1")
    pub device: String,

    /// Host that owns the device for its whole lifetime
    pub hostname: String,

    /// Pool the brick belongs to
    pub pool_name: String,

    /// Usable capacity in bytes
    pub capacity_bytes: u64,
}

impl BrickInfo {
    pub fn brick(&self) -> Brick {
        Brick {
            device: self.device.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

/// Identifies one physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Brick {
    pub device: String,
    pub hostname: String,
}

impl std::fmt::Display for Brick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.device)
    }
}

/// Current assignment of a brick to a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickAllocation {
    pub device: String,
    pub hostname: String,

    /// Pool the brick was allocated from
    #[serde(default)]
    pub pool_name: String,

    /// Volume the brick is assigned to, empty when free
    #[serde(default)]
    pub allocated_volume: String,

    /// Position within the volume; index 0 is the primary brick
    #[serde(default)]
    pub allocated_index: u32,

    /// Set when the volume no longer needs the brick
    #[serde(default)]
    pub deallocate_requested: bool,
}

impl BrickAllocation {
    pub fn brick(&self) -> Brick {
        Brick {
            device: self.device.clone(),
            hostname: self.hostname.clone(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.allocated_volume.is_empty()
    }

    pub fn is_primary(&self) -> bool {
        self.is_allocated() && self.allocated_index == 0
    }
}
