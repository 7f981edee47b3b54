// SPDX-License-Identifier: GPL-3.0-only

use std::pin::Pin;

use futures::Stream;

/// Typed change to a registry entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Created(T),
    Updated { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// The `(old, new)` pair; creation has no old value, deletion no new one
    pub fn into_pair(self) -> (Option<T>, Option<T>) {
        match self {
            Self::Created(new) => (None, Some(new)),
            Self::Updated { old, new } => (Some(old), Some(new)),
            Self::Deleted(old) => (Some(old), None),
        }
    }

    pub fn latest(&self) -> &T {
        match self {
            Self::Created(value) | Self::Deleted(value) => value,
            Self::Updated { new, .. } => new,
        }
    }
}

pub type WatchStream<T> = Pin<Box<dyn Stream<Item = WatchEvent<T>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_follow_creation_and_deletion() {
        assert_eq!(WatchEvent::Created(1).into_pair(), (None, Some(1)));
        assert_eq!(
            WatchEvent::Updated { old: 1, new: 2 }.into_pair(),
            (Some(1), Some(2))
        );
        assert_eq!(WatchEvent::Deleted(2).into_pair(), (Some(2), None));
    }
}
