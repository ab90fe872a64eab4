use crate::ast::Node;
use crate::context::Context;
use crate::env::{Environment, IO_PREFIX, format_binding, is_std_stream};
use crate::expand::malformed;
use crate::interpreter::Interpreter;
use crate::signal::{Flow, Interrupt};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use tracing::debug;

impl Interpreter {
    /// Run a command: a user function, a builtin, or an external program.
    pub(crate) fn run_cmd(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [names] = node.children.as_slice() else {
            return Err(malformed(node, "cmd"));
        };
        let args = self.expand(names, x)?;
        debug!(?args, "run cmd");
        if args.first().is_none_or(|a| a.is_empty()) {
            self.warn(x, format_args!("run cmd: empty command name"));
            return Err(Interrupt::status("empty command name"));
        }
        let args = if args[0] == "builtin" {
            &args[1..]
        } else {
            if let Some(func) = self.function(&args[0]) {
                return self.call_func(&func, x, &args);
            }
            &args[..]
        };
        let Some(name) = args.first() else {
            self.warn(x, format_args!("builtin: missing command name"));
            return Err(Interrupt::status("empty command name"));
        };
        let argv: Vec<&str> = args[1..].iter().map(String::as_str).collect();
        if let Some(cmd) = self.builtin(name, &argv) {
            cmd.execute(self, x)?;
            x.ctx().set_status("");
            return Ok(());
        }
        self.spawn_external(args, x)
    }

    /// Start an external program and wait for it.
    ///
    /// Failing to start it is only reported; how it terminated is left in
    /// the status variable.
    fn spawn_external(&self, args: &[String], x: &mut Environment) -> Flow {
        let ctx = x.ctx().clone();
        let dot = ctx.dot();
        let search = ctx.scalar("PATH");
        let Some(exe) = find_command_path(OsStr::new(&search), &dot, Path::new(&args[0])) else {
            self.warn(x, format_args!("{}: command not found", args[0]));
            return Ok(());
        };
        let (mut cmd, extra) = match self.prepare(&exe, args, x, &ctx) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.warn(x, format_args!("{}: {e}", args[0]));
                return Ok(());
            }
        };
        debug!(path = %exe.display(), extra = extra.len(), "spawn");
        let child = cmd.spawn();
        // The child has its copies now; ours must go so readers see EOF.
        drop(cmd);
        drop(extra);
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                self.warn(x, format_args!("{}: {e}", args[0]));
                return Ok(());
            }
        };
        let status = child.wait()?;
        let text = exit_text(status);
        debug!(pid = child.id(), status = %text, "exited");
        ctx.set_status(text);
        Ok(())
    }

    fn prepare(
        &self,
        exe: &Path,
        args: &[String],
        x: &Environment,
        ctx: &Context,
    ) -> io::Result<(Command, Vec<File>)> {
        let mut cmd = Command::new(exe);
        cmd.args(&args[1..])
            .current_dir(ctx.dot())
            .stdin(stdio(x, "in")?)
            .stdout(stdio(x, "out")?)
            .stderr(stdio(x, "err")?);

        let mut env: Vec<(String, String)> = ctx
            .export()
            .into_iter()
            .filter(|(k, _)| !k.starts_with("clivebg") && !k.starts_with(IO_PREFIX))
            .collect();
        let mut extra = Vec::new();
        for (name, h) in x.streams().filter(|(n, _)| !is_std_stream(n)) {
            let fd = 3 + extra.len() as RawFd;
            extra.push(h.try_clone_file()?);
            env.push(format_binding(name, h.dir(), fd));
        }
        env.push(("dot".to_string(), ctx.dot().display().to_string()));
        if x.in_bg() {
            env.push(("clivebg".to_string(), "y".to_string()));
        }
        cmd.env_clear().envs(env);

        if !extra.is_empty() {
            let fds: Vec<RawFd> = extra.iter().map(AsRawFd::as_raw_fd).collect();
            let mut tmp = vec![-1; fds.len()];
            // SAFETY: remap_fds only calls fcntl and dup2 and does not allocate.
            unsafe {
                cmd.pre_exec(move || remap_fds(&fds, &mut tmp));
            }
        }
        Ok((cmd, extra))
    }
}

fn stdio(x: &Environment, name: &str) -> io::Result<Stdio> {
    match x.stream(name) {
        Some(h) => Ok(Stdio::from(h.try_clone_file()?)),
        None => Ok(Stdio::null()),
    }
}

/// Move `fds` to descriptors 3, 4, ... in the child.
///
/// Copies go above the target range first so no source is clobbered before
/// it is moved.
fn remap_fds(fds: &[RawFd], tmp: &mut [RawFd]) -> io::Result<()> {
    let base = 3 + fds.len() as RawFd;
    for (t, &fd) in tmp.iter_mut().zip(fds) {
        // SAFETY: plain descriptor duplication.
        let r = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, base) };
        if r == -1 {
            return Err(io::Error::last_os_error());
        }
        *t = r;
    }
    for (i, &t) in tmp.iter().enumerate() {
        // SAFETY: dup2 clears close-on-exec on the target, which is the point.
        if unsafe { libc::dup2(t, 3 + i as RawFd) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Status text for a terminated process; empty on success.
fn exit_text(status: ExitStatus) -> String {
    if status.success() {
        return String::new();
    }
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => format!("signal: {}", terminated_by_signal(status)),
    }
}

fn terminated_by_signal(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(-1)
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - `./foo` or a relative path with several components (e.g. `bin/sh`):
///   resolved against `dot` and returned if it exists.
/// - Single path component: search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(
    search_paths: &OsStr,
    dot: &Path,
    path: &'a Path,
) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") {
        return find_by_path(&dot.join(path)).map(|p| Cow::Owned(p.to_path_buf()));
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(&dot.join(path)).map(|p| Cow::Owned(p.to_path_buf())),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .find_map(|dir| find_by_path(&dir.join(cmd)).map(Path::to_path_buf))
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}
