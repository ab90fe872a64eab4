use crate::vars::{Value, Vars};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the status variable. Empty means success.
pub const STATUS: &str = "sts";

#[derive(Debug, Clone)]
struct State {
    vars: Vars,
    dot: PathBuf,
}

/// Variables and working directory seen by a running command.
///
/// Cloning a `Context` shares the same state, so a `set` through one clone
/// is seen through all of them. [`Context::fork`] copies the state instead,
/// giving a pipeline stage a private view that cannot leak back.
#[derive(Debug, Clone)]
pub struct Context {
    state: Arc<RwLock<State>>,
}

impl Context {
    pub fn new(vars: Vars, dot: PathBuf) -> Self {
        Self {
            state: Arc::new(RwLock::new(State { vars, dot })),
        }
    }

    /// A private copy of the current state.
    pub fn fork(&self) -> Self {
        let copy = self.state.read().clone();
        Self {
            state: Arc::new(RwLock::new(copy)),
        }
    }

    /// True if both contexts share one state.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn var(&self, name: &str) -> Option<Value> {
        self.state.read().vars.get(name).cloned()
    }

    pub fn list(&self, name: &str) -> Vec<String> {
        self.state.read().vars.list(name)
    }

    pub fn map(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        self.state.read().vars.map(name)
    }

    pub fn is_map(&self, name: &str) -> bool {
        self.state.read().vars.is_map(name)
    }

    pub fn scalar(&self, name: &str) -> String {
        self.state.read().vars.scalar(name)
    }

    pub fn set_list(&self, name: &str, words: Vec<String>) {
        self.state.write().vars.set_list(name, words);
    }

    pub fn set_map(&self, name: &str, map: BTreeMap<String, Vec<String>>) {
        self.state.write().vars.set_map(name, map);
    }

    pub fn set_scalar(&self, name: &str, s: impl Into<String>) {
        self.state.write().vars.set_scalar(name, s);
    }

    pub fn status(&self) -> String {
        self.scalar(STATUS)
    }

    pub fn set_status(&self, s: impl Into<String>) {
        self.set_scalar(STATUS, s);
    }

    /// Exported bindings for a child process.
    pub fn export(&self) -> Vec<(String, String)> {
        self.state.read().vars.export()
    }

    pub fn dot(&self) -> PathBuf {
        self.state.read().dot.clone()
    }

    pub fn set_dot(&self, dot: PathBuf) {
        self.state.write().dot = dot;
    }

    /// `path` resolved against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.state.read().dot.join(path)
        }
    }
}
