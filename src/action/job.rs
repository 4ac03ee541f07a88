//! Burst jobs
//!
//! A [`Job`] is the atomic unit of 3A `set` and driver enqueue: an ordered
//! group of exactly `capacity` actions. Its id is the magic number of its
//! first member.

use super::arena::ActHandle;
use super::id::MagicNum;
use std::fmt;

/// Ordered, fixed-capacity group of action handles
pub struct Job {
    acts: Vec<ActHandle>,
    capacity: usize,
    id: MagicNum,
}

impl Job {
    /// An empty job; also the "not ready" value of `require_job`
    pub fn new(capacity: usize) -> Self {
        Self {
            acts: Vec::with_capacity(capacity),
            capacity,
            id: MagicNum::NULL,
        }
    }

    pub fn push(&mut self, act: ActHandle) {
        self.acts.push(act);
    }

    pub fn id(&self) -> MagicNum {
        self.id
    }

    pub fn set_id(&mut self, id: MagicNum) {
        self.id = id;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.acts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    /// Exactly `capacity` actions are present
    pub fn is_ready(&self) -> bool {
        self.capacity > 0 && self.acts.len() == self.capacity
    }

    pub fn first(&self) -> Option<&ActHandle> {
        self.acts.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActHandle> {
        self.acts.iter()
    }

    /// Break the job up, handing ownership of every action to the caller
    pub fn into_acts(self) -> Vec<ActHandle> {
        self.acts
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("len", &self.acts.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
