//! Task controller
//!
//! Owns the action arena, hands out sequence ids, assigns magic numbers on
//! registration and keeps the live pool of registered actions. It also
//! carries the session lock: one coarse mutex callers hold around an
//! enroll -> fill -> verify -> require_job sequence so those steps are not
//! interleaved between the caller thread and 3A callbacks.

use super::magic::MagicGenerator;
use crate::action::arena::{ActHandle, ActionArena};
use crate::action::id::{ActId, MagicNum};
use crate::action::record::ActionRecord;
use crate::delivery::wait::lock;
use crate::types::ActionKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{trace, warn};

/// Diagnostics snapshot of the live pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolDump {
    pub captured_at: DateTime<Utc>,
    pub pool: Vec<u32>,
    pub live_records: usize,
}

/// Pool of live actions
pub struct TaskController {
    arena: ActionArena,
    pool: Mutex<Vec<ActId>>,
    next_id: AtomicU32,
    session: Mutex<()>,
    magic: Box<dyn MagicGenerator>,
}

impl TaskController {
    pub fn new(magic: Box<dyn MagicGenerator>) -> Self {
        Self {
            arena: ActionArena::new(),
            pool: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(ActId::FIRST.0),
            session: Mutex::new(()),
            magic,
        }
    }

    /// Next sequence id. Lock-free; never NULL or INVALID.
    pub fn generate_id(&self) -> ActId {
        let prev = self
            .next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(ActId(cur).next().0)
            })
            .unwrap_or(ActId::FIRST.0);
        ActId(prev)
    }

    /// Allocate a fresh record with a new id and no magic number
    pub fn create_act(&self) -> ActHandle {
        self.arena.insert(ActionRecord::new(self.generate_id()))
    }

    pub fn with_act<R>(&self, act: &ActHandle, f: impl FnOnce(&ActionRecord) -> R) -> Option<R> {
        self.arena.with(act, f)
    }

    pub fn with_act_mut<R>(
        &self,
        act: &ActHandle,
        f: impl FnOnce(&mut ActionRecord) -> R,
    ) -> Option<R> {
        self.arena.with_mut(act, f)
    }

    /// Assign the magic number and add the action to the live pool.
    ///
    /// Normal and Internal actions get a fresh magic number; Bypass and
    /// unclassified actions get [`MagicNum::INVALID`].
    pub fn register_act(&self, act: &ActHandle) -> bool {
        let Some(kind) = self.arena.with(act, ActionRecord::kind) else {
            warn!(?act, "register on a stale handle");
            return false;
        };
        let magic = match kind {
            ActionKind::Normal | ActionKind::Internal => self.magic.next_magic(),
            ActionKind::Bypass | ActionKind::Null => MagicNum::INVALID,
        };
        self.arena.with_mut(act, |rec| {
            rec.magic = magic;
            rec.meta_set.magic = magic;
        });
        lock(&self.pool).push(act.id());
        trace!(id = %act.id(), %magic, ?kind, "action registered");
        true
    }

    /// Retire an action: drop it from the pool and free its arena slot
    pub fn release_act(&self, act: ActHandle) -> bool {
        let id = act.id();
        let in_pool = {
            let mut pool = lock(&self.pool);
            match pool.iter().position(|p| *p == id) {
                Some(pos) => {
                    pool.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !in_pool {
            warn!(%id, "released action was not in the pool");
        }
        match self.arena.remove(act) {
            Some(rec) => {
                if rec.holds_buffers() {
                    warn!(%id, magic = %rec.magic, "action retired while holding buffers");
                }
                in_pool
            }
            None => {
                warn!(%id, "release on a stale handle");
                false
            }
        }
    }

    /// Clear the pool at the end of a flush
    pub fn reset(&self) {
        let mut pool = lock(&self.pool);
        if !pool.is_empty() {
            warn!(leftover = ?*pool, "pool not empty on reset");
            pool.clear();
        }
        drop(pool);
        if self.arena.is_empty() {
            self.next_id.store(ActId::FIRST.0, Ordering::Release);
        }
    }

    /// Registered actions not yet released
    pub fn pool_len(&self) -> usize {
        lock(&self.pool).len()
    }

    /// Records alive in the arena, registered or not
    pub fn live_len(&self) -> usize {
        self.arena.len()
    }

    /// Hold the session lock for an enroll/verify/require sequence
    pub fn session_lock(&self) -> MutexGuard<'_, ()> {
        lock(&self.session)
    }

    pub fn dump_pool(&self) -> String {
        let dump = PoolDump {
            captured_at: Utc::now(),
            pool: lock(&self.pool).iter().map(|id| id.0).collect(),
            live_records: self.arena.len(),
        };
        serde_json::to_string(&dump).unwrap_or_else(|e| format!("<dump failed: {}>", e))
    }
}
