//! Pipeline construction: per-stage environments, redirections, and the
//! pipes feeding nested io-blocks.

use crate::ast::{FileMode, Node, NodeKind, Redirection};
use crate::env::{Environment, is_std_stream};
use crate::expand::malformed;
use crate::interpreter::Interpreter;
use crate::records::collect;
use crate::signal::Interrupt;
use crate::stream::{Direction, StreamHandle, pipe};
use crate::task::Task;
use anyhow::Context as _;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::debug;

type Pending = BTreeMap<String, StreamHandle>;

impl Interpreter {
    /// Build one environment per stage of `node`, with its redirections applied.
    ///
    /// On failure every stream opened so far, in every stage, is released
    /// before the error is returned.
    pub(crate) fn mk_child_envs(
        &self,
        x: &mut Environment,
        node: &Arc<Node>,
    ) -> Result<Vec<Environment>, Interrupt> {
        let last = node.children.len().saturating_sub(1);
        let mut envs = Vec::with_capacity(node.children.len());
        let mut pending = Pending::new();
        for (i, stage) in node.children.iter().enumerate() {
            let mut cx = x.dup();
            for (name, h) in std::mem::take(&mut pending) {
                cx.bind(&name, h);
            }
            if let Err(e) = self.apply_redirs(stage, &mut cx, i == last, &mut pending) {
                for (_, h) in pending {
                    h.close();
                }
                drop(cx);
                drop(envs);
                if !e.unwinds() {
                    self.warn(x, format_args!("{e}"));
                }
                return Err(e);
            }
            envs.push(cx);
        }
        Ok(envs)
    }

    fn apply_redirs(
        &self,
        stage: &Arc<Node>,
        cx: &mut Environment,
        last: bool,
        pending: &mut Pending,
    ) -> Result<(), Interrupt> {
        for r in &stage.redirs {
            match r {
                Redirection::File { stream, mode, path } => {
                    let words = self.expand1(path, cx)?;
                    let [p] = words.as_slice() else {
                        return Err(Interrupt::status(format!(
                            "redirect {stream}: path must be a single name"
                        )));
                    };
                    let path = cx.ctx().resolve(p);
                    let mut opts = OpenOptions::new();
                    match mode {
                        FileMode::Read => opts.read(true),
                        FileMode::Truncate => opts.write(true).create(true).truncate(true),
                        FileMode::Append => opts.append(true).create(true),
                    };
                    let f = opts
                        .open(&path)
                        .with_context(|| format!("redirect {stream}: {}", path.display()))?;
                    let dir = if *mode == FileMode::Read {
                        Direction::In
                    } else {
                        Direction::Out
                    };
                    debug!(%stream, path = %path.display(), ?mode, "redirect");
                    cx.bind(stream, StreamHandle::owned(stream, dir, f));
                }
                Redirection::Pipe { from, to } => {
                    if last {
                        return Err(Interrupt::status(format!(
                            "pipe {from}: no next command in pipeline"
                        )));
                    }
                    if pending.contains_key(to) {
                        return Err(Interrupt::status(format!("pipe: {to} is piped twice")));
                    }
                    let (rd, wr) = pipe(from)?;
                    cx.bind(from, wr);
                    pending.insert(to.clone(), rd);
                }
                Redirection::Dup { stream, source } => {
                    let Some(h) = cx.stream(source).map(StreamHandle::share) else {
                        return Err(Interrupt::status(format!(
                            "dup {stream}: no stream named {source}"
                        )));
                    };
                    cx.bind(stream, h);
                }
            }
        }
        Ok(())
    }

    /// Run the nested block of `node` with its `cname` output going to a new
    /// pipe; returns the read end.
    pub(crate) fn pipe_from(
        &self,
        node: &Arc<Node>,
        x: &mut Environment,
        cname: &str,
    ) -> Result<StreamHandle, Interrupt> {
        if cname.is_empty() || cname == "in" {
            return Err(Interrupt::status(format!("can't pipe from {cname:?}")));
        }
        let (rd, wr) = pipe(cname)?;
        let mut cx = x.dup();
        cx.bind(cname, wr);
        self.spawn_block(node, cx, x)?;
        Ok(rd)
    }

    /// Run the nested block of `node` with its `cname` input coming from a
    /// new pipe; returns the write end.
    pub(crate) fn pipe_to(
        &self,
        node: &Arc<Node>,
        x: &mut Environment,
        cname: &str,
    ) -> Result<StreamHandle, Interrupt> {
        if cname.is_empty() || cname == "out" || cname == "err" {
            return Err(Interrupt::status(format!("can't pipe to {cname:?}")));
        }
        let (rd, wr) = pipe(cname)?;
        let mut cx = x.dup();
        cx.bind(cname, rd);
        self.spawn_block(node, cx, x)?;
        Ok(wr)
    }

    fn spawn_block(
        &self,
        node: &Arc<Node>,
        mut cx: Environment,
        x: &mut Environment,
    ) -> Result<(), Interrupt> {
        let sh = self.clone();
        let node = node.clone();
        let task = Task::spawn("ioblk", move || {
            let res = sh.run_block(&node, &mut cx);
            drop(cx);
            res
        })?;
        x.track(task);
        Ok(())
    }

    /// Expand an io-block leaf.
    ///
    /// `<{...}` yields the records the block writes; the tagged forms bind a
    /// new stream in `x` and yield its marker argument. Failures are
    /// reported and yield no argument.
    pub(crate) fn expand_io(
        &self,
        node: &Arc<Node>,
        x: &mut Environment,
    ) -> Result<Vec<String>, Interrupt> {
        if node.kind != NodeKind::IoBlk {
            return Err(malformed(node, "ioblk"));
        }
        let res = match node.args.as_slice() {
            [_] => self.capture_io(node, x),
            [dir, tag] => self.bind_io(node, x, dir, tag).map(|m| vec![m]),
            _ => return Err(malformed(node, "ioblk")),
        };
        match res {
            Err(e) if !e.unwinds() => {
                self.warn(x, format_args!("expand: io: {e}"));
                Ok(Vec::new())
            }
            res => res,
        }
    }

    fn capture_io(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Vec<String>, Interrupt> {
        let rd = self.pipe_from(node, x, "out")?;
        let (names, err) = collect(&rd);
        rd.close();
        if let Some(e) = err {
            self.warn(x, format_args!("expand: io: {e}"));
        }
        Ok(names)
    }

    fn bind_io(
        &self,
        node: &Arc<Node>,
        x: &mut Environment,
        dir: &str,
        tag: &str,
    ) -> Result<String, Interrupt> {
        if tag.contains([';', ',']) {
            return Err(Interrupt::status(format!("bad io tag {tag:?}")));
        }
        let tags: Vec<&str> = tag.split(':').filter(|t| !t.is_empty()).collect();
        match dir {
            ">" => {
                let (cname, nname) = match tags.as_slice() {
                    [n] => ("in", *n),
                    [c, n] => (*c, *n),
                    _ => return Err(Interrupt::status(format!("bad io tag {tag:?}"))),
                };
                if nname == "in" {
                    return Err(Interrupt::status(format!("can't bind {nname} for output")));
                }
                let wr = self.pipe_to(node, x, cname)?;
                x.bind(nname, wr);
                Ok(format!("|>{nname}"))
            }
            "<" => {
                let (nname, cname) = match tags.as_slice() {
                    [n] => (*n, "out"),
                    [n, c] => (*n, *c),
                    _ => return Err(Interrupt::status(format!("bad io tag {tag:?}"))),
                };
                if is_std_stream(nname) && nname != "in" {
                    return Err(Interrupt::status(format!("can't bind {nname} for input")));
                }
                let rd = self.pipe_from(node, x, cname)?;
                x.bind(nname, rd);
                Ok(format!("|<{nname}"))
            }
            _ => Err(Interrupt::status(format!("bad io direction {dir:?}"))),
        }
    }
}
