//! Small recyclable integer identifiers
//!
//! Each namespace (actors, world objects, telemetry observers) gets its own
//! allocator. Released ids go to a free list and are reissued before the
//! counter advances.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// An identifier type backed by a `u32`
pub trait RawId: Copy + Eq + std::hash::Hash + fmt::Debug {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
}

macro_rules! raw_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl RawId for $name {
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

raw_id!(
    /// Identifies a ship (human, bot or agent)
    ActorId
);
raw_id!(
    /// Identifies a world object (projectile, asteroid)
    ObjectId
);
raw_id!(
    /// Identifies a telemetry page connection
    ObserverId
);

/// Identifier lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id {0} released while not live")]
    NotLive(u32),
}

/// Free-list + monotonic counter allocator
#[derive(Debug)]
pub struct IdAllocator<T: RawId> {
    next: u32,
    free: VecDeque<u32>,
    live: HashSet<u32>,
    _kind: PhantomData<T>,
}

impl<T: RawId> IdAllocator<T> {
    pub fn new() -> Self {
        Self {
            next: 1,
            free: VecDeque::new(),
            live: HashSet::new(),
            _kind: PhantomData,
        }
    }

    /// Reissue the longest-released id, or mint a new one
    pub fn allocate(&mut self) -> T {
        let raw = match self.free.pop_front() {
            Some(raw) => raw,
            None => {
                let raw = self.next;
                self.next += 1;
                raw
            }
        };
        self.live.insert(raw);
        T::from_raw(raw)
    }

    /// Return an id to the pool. Releasing an id that is not live is a fault.
    pub fn release(&mut self, id: T) -> Result<(), IdError> {
        let raw = id.raw();
        if !self.live.remove(&raw) {
            return Err(IdError::NotLive(raw));
        }
        self.free.push_back(raw);
        Ok(())
    }

    pub fn is_live(&self, id: T) -> bool {
        self.live.contains(&id.raw())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl<T: RawId> Default for IdAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn counter_starts_at_one() {
        let mut ids = IdAllocator::<ActorId>::new();
        assert_eq!(ids.allocate(), ActorId(1));
        assert_eq!(ids.allocate(), ActorId(2));
    }

    #[test]
    fn released_ids_are_reused_first() {
        let mut ids = IdAllocator::<ObjectId>::new();
        let a = ids.allocate();
        let b = ids.allocate();
        ids.release(a).unwrap();
        assert_eq!(ids.allocate(), a);
        assert_eq!(ids.allocate(), ObjectId(3));
        assert!(ids.is_live(b));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut ids = IdAllocator::<ActorId>::new();
        let a = ids.allocate();
        ids.release(a).unwrap();
        assert_eq!(ids.release(a), Err(IdError::NotLive(1)));
        assert_eq!(ids.release(ActorId(99)), Err(IdError::NotLive(99)));
    }

    proptest! {
        /// Live ids stay unique under any interleaving of allocate/release
        #[test]
        fn prop_live_ids_unique(ops in prop::collection::vec(any::<(bool, u8)>(), 1..200)) {
            let mut ids = IdAllocator::<ObjectId>::new();
            let mut live: Vec<ObjectId> = Vec::new();
            for (alloc, pick) in ops {
                if alloc || live.is_empty() {
                    let id = ids.allocate();
                    prop_assert!(!live.contains(&id), "reissued live id {:?}", id);
                    live.push(id);
                } else {
                    let idx = pick as usize % live.len();
                    let id = live.swap_remove(idx);
                    prop_assert!(ids.release(id).is_ok());
                }
                prop_assert_eq!(ids.live_count(), live.len());
            }
        }
    }
}
