// SPDX-License-Identifier: GPL-3.0-only

pub mod actions;
pub mod mutex;
pub mod pool;
pub mod provider;
pub mod session;

pub use actions::{ActionReceiver, SessionActions};
pub use mutex::Mutex;
pub use pool::PoolRegistry;
pub use provider::{Mounter, Provider, ProviderResult, VolumeProvider};
pub use session::{SessionRegistry, VolumeRegistry};
