//! Slot arena for action records
//!
//! Records are stored in a generational slot vector. Queues never hold a
//! record or a reference to one; they hold an [`ActHandle`], which is
//! move-only, so a record is owned by exactly one queue at a time and a
//! retired handle cannot reach a reused slot.
//!
//! # Architecture
//!
//! ```text
//!  collector roll ─┐
//!  request queue ──┼── ActHandle{index, generation} ──> ArenaSlot{generation, record}
//!  processing q ───┘
//! ```
//!
//! The arena lock is held only for the duration of one `with`/`with_mut`
//! closure. Closures must not call back into the arena or into consumer
//! code.

use super::id::ActId;
use super::record::ActionRecord;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Move-only handle to a record in the arena
pub struct ActHandle {
    index: u32,
    generation: u32,
    id: ActId,
}

impl ActHandle {
    /// Sequence id of the record behind this handle
    pub fn id(&self) -> ActId {
        self.id
    }
}

impl fmt::Debug for ActHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ActHandle({}, slot={}@{})",
            self.id.0, self.index, self.generation
        )
    }
}

struct ArenaSlot {
    generation: u32,
    record: Option<ActionRecord>,
}

#[derive(Default)]
struct ArenaSlots {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
}

/// Generational storage for [`ActionRecord`]s
#[derive(Default)]
pub struct ActionArena {
    inner: Mutex<ArenaSlots>,
}

impl ActionArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, ArenaSlots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a record and hand out the only handle to it
    pub fn insert(&self, record: ActionRecord) -> ActHandle {
        let id = record.id;
        let mut inner = self.slots();
        inner.live += 1;
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.record = Some(record);
            return ActHandle {
                index,
                generation: slot.generation,
                id,
            };
        }
        let index = inner.slots.len() as u32;
        inner.slots.push(ArenaSlot {
            generation: 0,
            record: Some(record),
        });
        ActHandle {
            index,
            generation: 0,
            id,
        }
    }

    /// Read access to the record behind a handle
    pub fn with<R>(&self, handle: &ActHandle, f: impl FnOnce(&ActionRecord) -> R) -> Option<R> {
        let inner = self.slots();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_ref().map(f)
    }

    /// Write access to the record behind a handle
    pub fn with_mut<R>(
        &self,
        handle: &ActHandle,
        f: impl FnOnce(&mut ActionRecord) -> R,
    ) -> Option<R> {
        let mut inner = self.slots();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_mut().map(f)
    }

    /// Consume the handle and take the record out; the slot is recycled
    pub fn remove(&self, handle: ActHandle) -> Option<ActionRecord> {
        let mut inner = self.slots();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        inner.live -= 1;
        Some(record)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.slots().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_with_remove() {
        let arena = ActionArena::new();
        let h = arena.insert(ActionRecord::new(ActId(7)));
        assert_eq!(h.id(), ActId(7));
        assert_eq!(arena.with(&h, |r| r.id), Some(ActId(7)));
        arena.with_mut(&h, |r| r.sof_idx = 9);
        assert_eq!(arena.with(&h, |r| r.sof_idx), Some(9));
        assert_eq!(arena.len(), 1);

        let rec = arena.remove(h).unwrap();
        assert_eq!(rec.sof_idx, 9);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let arena = ActionArena::new();
        let first = arena.insert(ActionRecord::new(ActId(1)));
        let stale = ActHandle {
            index: first.index,
            generation: first.generation,
            id: first.id,
        };
        arena.remove(first);

        let second = arena.insert(ActionRecord::new(ActId(2)));
        assert_eq!(second.index, stale.index);
        assert_ne!(second.generation, stale.generation);
        assert!(arena.with(&stale, |r| r.id).is_none());
        assert!(arena.remove(stale).is_none());
        assert_eq!(arena.with(&second, |r| r.id), Some(ActId(2)));
    }
}
