//! Background job registry.
//!
//! Tracks pipelines started in the background and lets callers wait for a
//! tagged job or for every job to finish.

use crate::task::Rendezvous;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Unique identifier for a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Information about a live job for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    /// `None` for anonymous jobs.
    pub tag: Option<String>,
}

struct State {
    next_id: u64,
    live: BTreeMap<JobId, Option<String>>,
    tagged: HashMap<String, Arc<Rendezvous>>,
    all_done: Arc<Rendezvous>,
}

/// Registry of background jobs, one per interpreter.
pub struct JobRegistry {
    state: Mutex<State>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 1,
                live: BTreeMap::new(),
                tagged: HashMap::new(),
                all_done: Rendezvous::new(),
            }),
        }
    }

    /// Register a job. `tag` is `None` for an anonymous job.
    pub fn add(&self, tag: Option<&str>) -> JobId {
        let mut st = self.state.lock();
        let id = JobId(st.next_id);
        st.next_id += 1;
        st.live.insert(id, tag.map(str::to_string));
        if let Some(tag) = tag {
            st.tagged
                .entry(tag.to_string())
                .or_insert_with(Rendezvous::new);
        }
        debug!(%id, ?tag, "job added");
        id
    }

    /// Unregister a finished job, releasing anyone waiting for it.
    pub fn del(&self, id: JobId) {
        let mut st = self.state.lock();
        let Some(tag) = st.live.remove(&id) else {
            return;
        };
        if let Some(tag) = tag {
            if let Some(r) = st.tagged.remove(&tag) {
                r.fire();
            }
        }
        if st.live.is_empty() {
            st.all_done.fire();
            st.all_done = Rendezvous::new();
        }
        debug!(%id, "job done");
    }

    /// Wait for the job tagged `tag`, or for all jobs if `tag` is empty.
    ///
    /// Unknown tags and an empty registry return at once.
    pub fn wait(&self, tag: &str) {
        let r = {
            let st = self.state.lock();
            if !tag.is_empty() {
                st.tagged.get(tag).cloned()
            } else if st.live.is_empty() {
                None
            } else {
                Some(st.all_done.clone())
            }
        };
        if let Some(r) = r {
            r.wait();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// True if a job with this tag is still registered.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.state.lock().tagged.contains_key(tag)
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(id, tag)| JobInfo {
                id: *id,
                tag: tag.clone(),
            })
            .collect()
    }
}

/// Unregisters its job when dropped.
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    id: JobId,
}

impl JobGuard {
    pub fn new(registry: Arc<JobRegistry>, tag: Option<&str>) -> Self {
        let id = registry.add(tag);
        Self { registry, id }
    }

    pub fn id(&self) -> JobId {
        self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.del(self.id);
    }
}
