// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the data accelerator buffer service
//!
//! These types are shared by every layer of the stack:
//!
//! - **dacc-registry**: persists them as JSON in the keystore
//! - **dacc-service**: the allocator, session facade and host watcher operate on them
//! - **dacctl**: renders them for the job scheduler integration
//!
//! ## Entities
//!
//! - `BrickInfo` / `Brick` → one physical device owned by one host
//! - `BrickAllocation` → the assignment of a brick to a volume
//! - `Pool` / `PoolInfo` → bricks grouped by allocation granularity
//! - `Session` (also known as `Volume`) → a provisioned buffer and its lifecycle state
//! - `SessionAction` → the request/result exchanged with a provisioning host

pub mod action;
pub mod brick;
pub mod capacity;
pub mod common;
pub mod job;
pub mod pool;
pub mod session;

pub use action::{SessionAction, SessionActionKind, SessionActionRequest};
pub use brick::{Brick, BrickAllocation, BrickInfo};
pub use capacity::{Capacity, parse_size};
pub use common::{bytes_to_pretty, ceil_div};
pub use job::JobRequest;
pub use pool::{Pool, PoolInfo};
pub use session::{Configuration, Session, SessionStatus, Volume, VolumeRequest, VolumeState};
