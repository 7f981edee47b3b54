// SPDX-License-Identifier: GPL-3.0-only

//! Data accelerator core
//!
//! - [`facade::SessionFacade`] creates and deletes buffers: it takes the
//!   session and allocation locks, picks bricks with the
//!   [`allocator::BrickAllocator`], persists the session and dispatches the
//!   provisioning action to the host holding the primary brick.
//! - [`workflow::SessionWorkflow`] runs the scheduler phases (data in,
//!   mount, unmount, data out) by requesting volume states and waiting for
//!   their completion.
//! - [`lifecycle::HostWatcher`] runs on every storage host, drives the
//!   volumes whose primary brick it holds through the provider and releases
//!   bricks handed back to the pool.
//! - [`action_handler::ActionHandler`] answers the actions dispatched by the
//!   facade.

pub mod action_handler;
pub mod allocator;
pub mod config;
pub mod devices;
pub mod error;
pub mod facade;
pub mod lifecycle;
pub mod locking;
pub mod logging;
pub mod provider;
pub mod store;
pub mod workflow;

pub use action_handler::ActionHandler;
pub use allocator::{Allocation, BrickAllocator};
pub use config::ServiceConfig;
pub use error::{AllocationError, ServiceError};
pub use facade::{SessionFacade, Timeouts};
pub use lifecycle::{HostWatcher, VolumeWatches};
pub use provider::{FakeProvider, ProviderOp};
pub use workflow::{BufferRequest, Phase, SessionWorkflow};
