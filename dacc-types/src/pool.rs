// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::brick::{Brick, BrickAllocation};

/// A named grouping of bricks
///
/// Pools are never created directly, they are derived from the bricks hosts
/// report. The granularity is the smallest brick capacity in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,

    /// Allocation unit in bytes
    pub granularity_bytes: u64,
}

/// Point in time view of a pool, used as allocator input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool: Pool,

    /// Free bricks on hosts that currently hold a liveness record
    pub available_bricks: Vec<Brick>,

    /// Every brick currently assigned to a volume
    pub allocated_bricks: Vec<BrickAllocation>,
}

impl PoolInfo {
    /// Total number of bricks known to be in the pool
    pub fn quantity(&self) -> usize {
        self.available_bricks.len() + self.allocated_bricks.len()
    }
}
