use crate::signal::{Flow, Interrupt};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread;

/// A one-shot signal: every waiter is released once it fires.
#[derive(Default)]
pub struct Rendezvous {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl Rendezvous {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cv.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Block until fired; returns at once if it already was.
    pub fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            self.cv.wait(&mut fired);
        }
    }
}

struct Completion {
    done: Rendezvous,
    outcome: Mutex<Option<Flow>>,
}

// Fires even if the task panics, so waiters are never stranded.
struct FireOnDrop(Arc<Completion>);

impl Drop for FireOnDrop {
    fn drop(&mut self) {
        self.0.done.fire();
    }
}

/// Completion handle of a spawned task.
#[derive(Clone)]
pub struct Task {
    completion: Arc<Completion>,
}

impl Task {
    /// Run `f` on a new thread named `name`.
    pub fn spawn<F>(name: &str, f: F) -> io::Result<Task>
    where
        F: FnOnce() -> Flow + Send + 'static,
    {
        let completion = Arc::new(Completion {
            done: Rendezvous::default(),
            outcome: Mutex::new(None),
        });
        let guard = FireOnDrop(completion.clone());
        thread::Builder::new().name(name.to_string()).spawn(move || {
            let guard = guard;
            let outcome = f();
            *guard.0.outcome.lock() = Some(outcome);
        })?;
        Ok(Task { completion })
    }

    pub fn is_done(&self) -> bool {
        self.completion.done.is_fired()
    }

    /// Block until the task ends and return how it ended.
    pub fn wait(&self) -> Flow {
        self.completion.done.wait();
        self.completion
            .outcome
            .lock()
            .clone()
            .unwrap_or_else(|| Err(Interrupt::status("task ended without outcome")))
    }
}
