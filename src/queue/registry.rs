//! In-memory registry of running jobs.
//!
//! Tracks which jobs a worker currently owns and how many retries each has
//! burned. Retry counts live here rather than in the database: they describe
//! the current run only, and a process restart deliberately resets them.

use std::collections::HashMap;

use parking_lot::Mutex;
use reelgen_core::JobId;

struct ActiveEntry {
    retries: u32,
}

#[derive(Default)]
pub struct ActiveJobs {
    inner: Mutex<HashMap<JobId, ActiveEntry>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly claimed job.
    pub fn insert(&self, id: JobId) {
        self.inner.lock().insert(id, ActiveEntry { retries: 0 });
    }

    /// Drop a finished job.
    pub fn release(&self, id: JobId) {
        self.inner.lock().remove(&id);
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.inner.lock().contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Retries consumed by this job in the current run.
    pub fn retry_count(&self, id: JobId) -> u32 {
        self.inner.lock().get(&id).map_or(0, |e| e.retries)
    }

    /// Record one more retry; returns the new count.
    pub fn bump_retry(&self, id: JobId) -> u32 {
        let mut inner = self.inner.lock();
        match inner.get_mut(&id) {
            Some(entry) => {
                entry.retries += 1;
                entry.retries
            }
            None => 0,
        }
    }
}
