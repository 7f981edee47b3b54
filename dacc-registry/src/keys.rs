// SPDX-License-Identifier: GPL-3.0-only

//! Key layout shared by every process that talks to the keystore

use dacc_contracts::{RegistryError, RegistryErrorKind};

pub const REGISTERED_BRICKS: &str = "/bricks/registered/";
pub const ALLOCATIONS: &str = "/bricks/allocations/";
pub const ALIVE_HOSTS: &str = "/bufferhost/alive/";
pub const SESSIONS: &str = "/sessions/";
pub const SESSION_LOCKS: &str = "/locks/sessions/";
pub const ALLOCATION_LOCK: &str = "/locks/allocation";
pub const ACTIONS: &str = "/actions/";
pub const ACTION_RESULTS: &str = "/action_results/";

/// Names become path segments, so they must be non-empty and free of `/`
pub fn check_segment(what: &str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() || value.contains('/') {
        return Err(RegistryError::new(
            RegistryErrorKind::InvalidInput,
            format!("invalid {what}: {value:?}"),
        ));
    }
    Ok(())
}

pub fn registered_brick(hostname: &str, device: &str) -> String {
    format!("{REGISTERED_BRICKS}{hostname}/{device}")
}

pub fn allocation(hostname: &str, device: &str) -> String {
    format!("{ALLOCATIONS}{hostname}/{device}")
}

pub fn host_allocations(hostname: &str) -> String {
    format!("{ALLOCATIONS}{hostname}/")
}

pub fn alive_host(hostname: &str) -> String {
    format!("{ALIVE_HOSTS}{hostname}")
}

pub fn hostname_from_alive(key: &str) -> Option<&str> {
    key.strip_prefix(ALIVE_HOSTS).filter(|host| !host.is_empty())
}

pub fn session(name: &str) -> String {
    format!("{SESSIONS}{name}")
}

pub fn session_lock(name: &str) -> String {
    format!("{SESSION_LOCKS}{name}")
}

pub fn host_actions(hostname: &str) -> String {
    format!("{ACTIONS}{hostname}/")
}

pub fn action(hostname: &str, session: &str, id: &str) -> String {
    format!("{ACTIONS}{hostname}/{session}/{id}")
}

pub fn action_result(id: &str) -> String {
    format!("{ACTION_RESULTS}{id}")
}
