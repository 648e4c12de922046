//! Stream identifier bookkeeping for a single connection.
//!
//! Every request in flight on a connection carries a [`StreamId`] so that the
//! read path can route the matching response back to whoever is waiting for
//! it. Ids are small and recycled: released ids go to the back of a FIFO pool
//! and are handed out again before the ceiling grows, which spreads reuse over
//! the id space and makes stale responses easier to spot.
//!
//! An id whose request expired locally cannot be recycled straight away since
//! the server may still answer on it. Such ids are parked with
//! [`SidManager::time_out`] until the late response shows up and
//! [`SidManager::release_timed_out`] returns them to the pool.
use std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
};

use log::trace;

use crate::Error;

pub type StreamId = u16;

/// Number of distinct stream ids a connection can have outstanding.
pub const STREAM_ID_SPACE: u32 = StreamId::MAX as u32 + 1;

#[derive(Debug, Default)]
struct SidState {
    free: VecDeque<StreamId>,
    timed_out: HashSet<StreamId>,
    ceiling: u32,
}

/// Allocator of stream ids, one per logical connection.
#[derive(Debug, Default)]
pub struct SidManager {
    state: Mutex<SidState>,
}

impl SidManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out an id not currently held by anyone else on this connection.
    pub fn allocate(&self) -> Result<StreamId, Error> {
        let mut state = self.lock();

        if let Some(id) = state.free.pop_front() {
            trace!("reusing stream id {id}");
            return Ok(id);
        }

        if state.ceiling == STREAM_ID_SPACE {
            return Err(Error::NoMoreFreeIds);
        }

        let id = state.ceiling as StreamId;
        state.ceiling += 1;
        trace!("issuing fresh stream id {id}");
        Ok(id)
    }

    /// Give an id back for reuse.
    ///
    /// Releasing an id that is not outstanding corrupts the pool; debug builds
    /// assert against it, release builds trust the caller.
    pub fn release(&self, id: StreamId) {
        let mut state = self.lock();
        debug_assert!(
            !state.free.contains(&id),
            "stream id {id} released twice"
        );
        state.free.push_back(id);
    }

    /// Park an id whose request expired before the server answered.
    pub fn time_out(&self, id: StreamId) {
        self.lock().timed_out.insert(id);
    }

    pub fn is_timed_out(&self, id: StreamId) -> bool {
        self.lock().timed_out.contains(&id)
    }

    /// The late answer for a parked id arrived, so the id can be reused.
    pub fn release_timed_out(&self, id: StreamId) {
        let mut state = self.lock();
        if state.timed_out.remove(&id) {
            state.free.push_back(id);
        }
    }

    /// Undo [`time_out`](Self::time_out), leaving the id held by its caller.
    pub fn clear_time_out(&self, id: StreamId) -> bool {
        self.lock().timed_out.remove(&id)
    }

    /// Number of ids currently held by callers or parked as timed out.
    pub fn outstanding(&self) -> usize {
        let state = self.lock();
        state.ceiling as usize - state.free.len()
    }

    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SidState> {
        // The state is only ever mutated by infallible operations, so a
        // poisoned lock still guards consistent data.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
