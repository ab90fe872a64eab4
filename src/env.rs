use crate::context::Context;
use crate::stream::{Direction, StreamHandle};
use crate::task::Task;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Prefix of the environment bindings naming extra streams of a process.
pub const IO_PREFIX: &str = "cliveio#";

/// Names of the standard streams, which never travel as bindings.
pub const STD_STREAMS: [&str; 3] = ["in", "out", "err"];

pub fn is_std_stream(name: &str) -> bool {
    STD_STREAMS.contains(&name)
}

static BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^cliveio#([^=]+)=([<>])([0-9]+)$").expect("binding pattern is valid")
});

/// Parse a `cliveio#<name>=<dir><fd>` binding.
///
/// Bindings for the standard streams and malformed ones are ignored.
pub fn parse_binding(key: &str, value: &str) -> Option<(String, Direction, RawFd)> {
    let line = format!("{key}={value}");
    let caps = BINDING.captures(&line)?;
    let name = caps[1].to_string();
    if is_std_stream(&name) {
        return None;
    }
    let dir = if &caps[2] == "<" {
        Direction::In
    } else {
        Direction::Out
    };
    let fd = caps[3].parse().ok()?;
    Some((name, dir, fd))
}

/// The binding a child process receives for stream `name` at descriptor `fd`.
pub fn format_binding(name: &str, dir: Direction, fd: RawFd) -> (String, String) {
    (format!("{IO_PREFIX}{name}"), format!("{}{fd}", dir.marker()))
}

/// Streams a process starts with: its standard streams plus the extra
/// named streams its parent handed over through `cliveio#` bindings.
///
/// Built once per interpreter; every top-level environment shares these
/// pinned handles.
#[derive(Debug, Clone)]
pub struct Inherited {
    streams: Vec<StreamHandle>,
}

impl Inherited {
    /// Capture the standard streams and, if `adopt` is set, every valid
    /// binding found in `vars`.
    pub fn capture(
        vars: impl IntoIterator<Item = (String, String)>,
        adopt: bool,
    ) -> io::Result<Self> {
        let mut streams = vec![
            StreamHandle::pinned_dup("in", Direction::In, io::stdin())?,
            StreamHandle::pinned_dup("out", Direction::Out, io::stdout())?,
            StreamHandle::pinned_dup("err", Direction::Out, io::stderr())?,
        ];
        if adopt {
            for (k, v) in vars {
                let Some((name, dir, fd)) = parse_binding(&k, &v) else {
                    continue;
                };
                match adopt_fd(fd) {
                    Some(owned) => {
                        debug!(stream = %name, fd, ?dir, "inherited stream");
                        streams.push(StreamHandle::pinned(&name, dir, owned));
                    }
                    None => warn!(stream = %name, fd, "inherited descriptor is not open"),
                }
            }
        }
        Ok(Self { streams })
    }

    pub fn streams(&self) -> &[StreamHandle] {
        &self.streams
    }
}

fn adopt_fd(fd: RawFd) -> Option<OwnedFd> {
    if fd < 3 {
        return None;
    }
    // SAFETY: fcntl only inspects the descriptor table.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return None;
    }
    // SAFETY: the descriptor is open and was handed to this process through
    // its binding; nothing else in the process claims it.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    // Children get their streams explicitly, never by accident.
    // SAFETY: plain flag update on a descriptor we own.
    unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    Some(owned)
}

/// Execution environment of a node: its named streams, the context it runs
/// in, and the tasks it spawned.
///
/// Children get their own environment through [`Environment::dup`], which
/// shares every stream. Dropping an environment (or calling
/// [`Environment::close`]) closes its streams and then waits for every task
/// it spawned.
pub struct Environment {
    streams: BTreeMap<String, StreamHandle>,
    ctx: Context,
    in_bg: bool,
    waits: Vec<Task>,
}

impl Environment {
    /// A top-level environment over the process' inherited streams.
    pub fn new(inherited: &Inherited, ctx: Context) -> Self {
        let mut env = Self::empty(ctx);
        for h in inherited.streams() {
            env.streams.insert(h.name().to_string(), h.share());
        }
        env
    }

    /// An environment with no streams bound.
    pub fn empty(ctx: Context) -> Self {
        Self {
            streams: BTreeMap::new(),
            ctx,
            in_bg: false,
            waits: Vec::new(),
        }
    }

    /// A child environment sharing every stream and the context.
    pub fn dup(&self) -> Self {
        Self {
            streams: self
                .streams
                .iter()
                .map(|(k, h)| (k.clone(), h.share()))
                .collect(),
            ctx: self.ctx.clone(),
            in_bg: self.in_bg,
            waits: Vec::new(),
        }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// Switch to a private copy of the context.
    pub fn fork_ctx(&mut self) {
        self.ctx = self.ctx.fork();
    }

    pub fn in_bg(&self) -> bool {
        self.in_bg
    }

    pub fn set_in_bg(&mut self, in_bg: bool) {
        self.in_bg = in_bg;
    }

    pub fn stream(&self, name: &str) -> Option<&StreamHandle> {
        self.streams.get(name)
    }

    pub fn streams(&self) -> impl Iterator<Item = (&str, &StreamHandle)> {
        self.streams.iter().map(|(k, h)| (k.as_str(), h))
    }

    /// Bind `handle` as `name`, closing whatever was bound before.
    ///
    /// The environment takes over the caller's reference to `handle`.
    pub fn bind(&mut self, name: &str, handle: StreamHandle) {
        if let Some(old) = self.streams.insert(name.to_string(), handle) {
            old.close();
        }
    }

    pub fn unbind(&mut self, name: &str) {
        if let Some(old) = self.streams.remove(name) {
            old.close();
        }
    }

    /// Make closing this environment wait for `task`.
    pub fn track(&mut self, task: Task) {
        self.waits.push(task);
    }

    /// Write to the `out` stream, or to the process' stdout if unbound.
    pub fn printf(&self, args: fmt::Arguments<'_>) -> io::Result<()> {
        match self.streams.get("out") {
            Some(h) => h.write_all(fmt::format(args).as_bytes()),
            None => io::stdout().write_fmt(args),
        }
    }

    /// Write to the `err` stream, or to the process' stderr if unbound.
    pub fn eprintf(&self, args: fmt::Arguments<'_>) -> io::Result<()> {
        match self.streams.get("err") {
            Some(h) => h.write_all(fmt::format(args).as_bytes()),
            None => io::stderr().write_fmt(args),
        }
    }

    /// Release the streams and wait for every spawned task.
    pub fn close(self) {
        drop(self)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        for (_, h) in std::mem::take(&mut self.streams) {
            h.close();
        }
        for t in self.waits.drain(..) {
            let _ = t.wait();
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .field("in_bg", &self.in_bg)
            .field("waits", &self.waits.len())
            .finish()
    }
}
