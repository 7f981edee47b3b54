// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the registry layer, the service core and providers

pub mod error;
pub mod keystore;
pub mod traits;
pub mod watch;

pub use error::{RegistryError, RegistryErrorKind};
pub use keystore::{KeyEvent, KeyEventStream, KeyValue, Keystore, LeaseId, Revision};
pub use traits::{
    ActionReceiver, Mounter, Mutex, PoolRegistry, Provider, ProviderResult, SessionActions,
    SessionRegistry, VolumeProvider, VolumeRegistry,
};
pub use watch::{WatchEvent, WatchStream};
