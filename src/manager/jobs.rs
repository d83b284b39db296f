use std::collections::VecDeque;

use parking_lot::Mutex;

use super::peers::PeerHandle;

/// Deferred work, drained at the top of each tick.
///
/// Kept as an enum so new deferred events slot in without changing the
/// queue's API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Ask the selector for pieces and fill the peer's request
    /// pipeline.
    PollBlocks { peer: PeerHandle },
}

/// FIFO of deferred jobs.
///
/// Selector-mutating work raised mid-dispatch goes through here rather
/// than running inline, so all selector writes happen in `periodic`.
/// The lock lets a multi-threaded host enqueue from its dispatch
/// thread.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Job) {
        self.inner.lock().push_back(job);
    }

    pub fn pop(&self) -> Option<Job> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
