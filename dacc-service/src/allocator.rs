// SPDX-License-Identifier: GPL-3.0-only

//! Brick selection
//!
//! Picks `ceil(capacity / granularity)` bricks from a pool snapshot with at
//! most one brick per host. Host order and the brick picked on each host are
//! random; seeding the allocator makes a run reproducible.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use dacc_types::{Brick, PoolInfo, ceil_div};

use crate::error::AllocationError;

/// Bricks chosen for one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// The first brick is the primary brick
    pub bricks: Vec<Brick>,
    pub actual_size_bytes: u64,
    pub primary_brick_host: String,
}

pub struct BrickAllocator {
    rng: Mutex<StdRng>,
}

impl Default for BrickAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BrickAllocator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn allocate(
        &self,
        pool_info: &PoolInfo,
        capacity_bytes: u64,
    ) -> Result<Allocation, AllocationError> {
        let pool = &pool_info.pool;
        if pool.granularity_bytes == 0 {
            return Err(AllocationError::InvalidGranularity {
                pool: pool.name.clone(),
            });
        }

        let requested_bricks = ceil_div(capacity_bytes, pool.granularity_bytes);
        let insufficient = || AllocationError::InsufficientCapacity {
            pool: pool.name.clone(),
            requested_bricks,
            available_bricks: pool_info.available_bricks.len(),
        };
        if requested_bricks > pool_info.available_bricks.len() as u64 {
            return Err(insufficient());
        }

        let mut by_host: BTreeMap<&str, Vec<&Brick>> = BTreeMap::new();
        for brick in &pool_info.available_bricks {
            by_host.entry(brick.hostname.as_str()).or_default().push(brick);
        }
        // one brick per host
        if requested_bricks > by_host.len() as u64 {
            return Err(insufficient());
        }

        let mut rng = self.rng.lock();
        let mut hosts: Vec<Vec<&Brick>> = by_host.into_values().collect();
        hosts.shuffle(&mut *rng);

        let bricks: Vec<Brick> = hosts
            .into_iter()
            .take(requested_bricks as usize)
            .map(|candidates| candidates[rng.random_range(0..candidates.len())].clone())
            .collect();

        let primary_brick_host = bricks
            .first()
            .map(|brick| brick.hostname.clone())
            .unwrap_or_default();
        tracing::debug!(
            pool = %pool.name,
            requested_bricks,
            primary = %primary_brick_host,
            "bricks selected"
        );

        Ok(Allocation {
            bricks,
            actual_size_bytes: requested_bricks * pool.granularity_bytes,
            primary_brick_host,
        })
    }
}

/// Host of some available brick, preferring `pool`
///
/// Only recorded for sessions that get no bricks of their own.
pub fn informational_primary_host(pool_infos: &[PoolInfo], pool: &str) -> Option<String> {
    pool_infos
        .iter()
        .filter(|info| info.pool.name == pool)
        .chain(pool_infos.iter().filter(|info| info.pool.name != pool))
        .find_map(|info| info.available_bricks.first())
        .map(|brick| brick.hostname.clone())
}
