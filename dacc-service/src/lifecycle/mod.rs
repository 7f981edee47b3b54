// SPDX-License-Identifier: GPL-3.0-only

//! Host side of the volume lifecycle
//!
//! Each storage host watches the allocation records of its own bricks. When
//! one of them becomes the primary brick of a volume, the host starts a
//! [`VolumeStateMachine`] for that volume and drives it through the provider
//! until it is deleted or fails.

pub mod host;
pub mod volume;
pub mod watches;

use dacc_contracts::WatchEvent;
use dacc_types::BrickAllocation;

pub use host::HostWatcher;
pub use volume::{Transition, VolumeStateMachine, transition_for};
pub use watches::VolumeWatches;

/// What an allocation change means for the host owning the brick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationChange {
    /// This host now drives the volume
    PrimaryAssigned(BrickAllocation),
    /// The volume let go of this brick
    DeallocateRequested(BrickAllocation),
    Ignored,
}

/// A newly created allocation record counts as a change from a free brick
pub fn classify(event: WatchEvent<BrickAllocation>) -> AllocationChange {
    let (old, new) = event.into_pair();
    let Some(new) = new else {
        return AllocationChange::Ignored;
    };
    let was_free = old.as_ref().is_none_or(|old| !old.is_allocated());

    if new.is_allocated() && was_free && new.allocated_index == 0 {
        return AllocationChange::PrimaryAssigned(new);
    }
    if let Some(old) = old
        && old.is_allocated()
        && new.deallocate_requested
        && !old.deallocate_requested
    {
        return AllocationChange::DeallocateRequested(new);
    }
    AllocationChange::Ignored
}
