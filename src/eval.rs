//! The node evaluator: pipelines, blocks, loops and conditionals.
//!
//! Every evaluator returns a [`Flow`]. `Break` and `Exit` unwind through
//! blocks and loops; any other error only stops the construct that saw it,
//! and a pipeline reports the outcome of its stages in the status variable.

use crate::ast::{Node, NodeKind};
use crate::env::Environment;
use crate::expand::malformed;
use crate::interpreter::Interpreter;
use crate::jobs::JobGuard;
use crate::records::collect;
use crate::signal::{Flow, Interrupt};
use crate::task::Task;
use crate::vars::set_list_el;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// How an `or` clause ended when nothing was raised.
enum Clauses {
    /// A clause before the last one failed; the next `or` gets its turn.
    Declined,
    /// Every clause ran.
    Exhausted,
}

impl Interpreter {
    /// Run a top-level node (a pipeline, source-include or function
    /// definition) in a fresh top-level environment.
    pub fn run(&self, node: &Arc<Node>) -> Flow {
        let mut x = self.top_env();
        let res = self.run_in(node, &mut x);
        x.close();
        res
    }

    /// Run a top-level node in the given environment.
    pub fn run_in(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        debug!(%node, "run");
        match node.kind {
            NodeKind::Pipe => self.run_pipe(node, x),
            NodeKind::Src => self.run_src(node, x),
            NodeKind::Func => self.run_func(node),
            _ => Err(malformed(node, "top-level")),
        }
    }

    pub(crate) fn run_pipe(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let ([bg], false) = (node.args.as_slice(), node.children.is_empty()) else {
            return Err(malformed(node, "pipe"));
        };
        let cxs = self.mk_child_envs(x, node)?;
        let last = node.children.len() - 1;
        let mut last_task = None;
        for (i, (c, mut cx)) in node.children.iter().zip(cxs).enumerate() {
            if !bg.is_empty() {
                cx.set_in_bg(true);
            }
            if !bg.is_empty() || i < last {
                cx.fork_ctx();
            }
            let job = (!bg.is_empty() && i == last).then(|| {
                let tag = (bg != "&").then_some(bg.as_str());
                JobGuard::new(self.jobs().clone(), tag)
            });
            let sh = self.clone();
            let c = c.clone();
            let task = Task::spawn(&c.kind.to_string(), move || {
                let res = sh.run_stage(&c, &mut cx);
                drop(cx);
                drop(job);
                res
            });
            let task = match task {
                Ok(t) => t,
                Err(e) => {
                    self.warn(x, format_args!("pipe: {e}"));
                    return Err(e.into());
                }
            };
            if i == last {
                last_task = Some(task);
            } else if bg.is_empty() {
                x.track(task);
            }
        }
        let ctx = x.ctx();
        if !bg.is_empty() {
            debug!(tag = %bg, "pipe in background");
            ctx.set_status("");
            return Ok(());
        }
        let Some(task) = last_task else {
            return Ok(());
        };
        match task.wait() {
            Ok(()) => {
                ctx.set_status("");
                Ok(())
            }
            Err(e) => {
                ctx.set_status(e.to_string());
                if e.unwinds() { Err(e) } else { Ok(()) }
            }
        }
    }

    /// Body of one pipeline stage, run on its own task.
    ///
    /// A status left behind by the stage becomes the task's failure.
    fn run_stage(&self, c: &Arc<Node>, cx: &mut Environment) -> Flow {
        match c.kind {
            NodeKind::Cmd => self.run_cmd(c, cx),
            NodeKind::Block => self.run_block(c, cx),
            NodeKind::For => self.run_for(c, cx),
            NodeKind::While => self.run_while(c, cx),
            NodeKind::Cond => self.run_cond(c, cx),
            NodeKind::Set => self.run_set(c, cx),
            NodeKind::SetMap => self.run_setmap(c, cx),
            _ => Err(malformed(c, "pipe stage")),
        }?;
        let sts = cx.ctx().status();
        if sts.is_empty() {
            Ok(())
        } else {
            Err(Interrupt::Status(sts))
        }
    }

    /// Run the commands of a block (or io-block), each in its own environment.
    pub(crate) fn run_block(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        if !matches!(node.kind, NodeKind::Block | NodeKind::IoBlk) || node.children.is_empty() {
            return Err(malformed(node, "block"));
        }
        for c in &node.children {
            let mut cx = x.dup();
            let res = match c.kind {
                NodeKind::Pipe => self.run_pipe(c, &mut cx),
                NodeKind::Src => self.run_src(c, &mut cx),
                _ => Err(malformed(c, "block command")),
            };
            cx.close();
            match res {
                Ok(()) => {}
                Err(e) if e.unwinds() => return Err(e),
                Err(e) => {
                    trace!(error = %e, "block stopped");
                    break;
                }
            }
        }
        Ok(())
    }

    fn run_for(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [header, body] = node.children.as_slice() else {
            return Err(malformed(node, "for"));
        };
        let mut names = self.expand(header, x)?.into_iter();
        let Some(name) = names.next() else {
            self.warn(x, format_args!("missing for variable name"));
            return Err(Interrupt::status("no variable name"));
        };
        let mut values: Vec<String> = names.collect();
        if values.is_empty() {
            if let Some(input) = x.stream("in").filter(|h| h.is_input()) {
                let (recs, err) = collect(input);
                if let Some(e) = err {
                    self.warn(x, format_args!("{e}"));
                    x.ctx().set_status(e.to_string());
                }
                values = recs;
            }
        }
        for v in values {
            x.ctx().set_scalar(&name, v);
            let mut cx = x.dup();
            let res = self.run_block(body, &mut cx);
            cx.close();
            match res {
                Ok(()) => {}
                Err(e) if e.is_exit() => return Err(e),
                Err(_) => break,
            }
        }
        x.ctx().set_status("");
        Ok(())
    }

    fn run_while(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [cond, body] = node.children.as_slice() else {
            return Err(malformed(node, "while"));
        };
        loop {
            let mut cx = x.dup();
            let res = self.run_pipe(cond, &mut cx);
            cx.close();
            match res {
                Ok(()) => {}
                Err(e) if e.is_exit() => return Err(e),
                Err(_) => break,
            }
            if !x.ctx().status().is_empty() {
                break;
            }
            let mut cx = x.dup();
            let res = self.run_block(body, &mut cx);
            cx.close();
            match res {
                Ok(()) => {}
                Err(e) if e.is_exit() => return Err(e),
                Err(_) => break,
            }
        }
        x.ctx().set_status("");
        Ok(())
    }

    /// Run the clauses of one alternation until one of them fails.
    fn run_or(&self, node: &Arc<Node>, x: &mut Environment) -> Result<Clauses, Interrupt> {
        if node.kind != NodeKind::Or || node.children.is_empty() {
            return Err(malformed(node, "or"));
        }
        let last = node.children.len() - 1;
        for (i, c) in node.children.iter().enumerate() {
            let mut cx = x.dup();
            let res = match c.kind {
                NodeKind::Pipe => self.run_pipe(c, &mut cx),
                NodeKind::Src => self.run_src(c, &mut cx),
                _ => Err(malformed(c, "or clause")),
            };
            cx.close();
            res?;
            if i < last && !x.ctx().status().is_empty() {
                return Ok(Clauses::Declined);
            }
        }
        x.ctx().set_status("");
        Ok(Clauses::Exhausted)
    }

    fn run_cond(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        if node.children.is_empty() {
            return Err(malformed(node, "cond"));
        }
        let mut res = Ok(());
        for or in &node.children {
            let mut cx = x.dup();
            let outcome = self.run_or(or, &mut cx);
            cx.close();
            match outcome {
                Ok(Clauses::Declined) => continue,
                Ok(Clauses::Exhausted) | Err(Interrupt::Break) => break,
                Err(e) if e.is_exit() => return Err(e),
                Err(e) => {
                    res = Err(e);
                    break;
                }
            }
        }
        x.ctx().set_status("");
        res
    }

    fn run_set(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [name] = node.args.as_slice() else {
            return Err(malformed(node, "set"));
        };
        match node.children.as_slice() {
            [values] => {
                let vals = self.expand(values, x)?;
                debug!(%name, ?vals, "set");
                x.ctx().set_list(name, vals);
            }
            [index, values] => {
                let idxs = self.expand1(index, x)?;
                let idx = match idxs.as_slice() {
                    [idx] => idx,
                    [] => {
                        self.warn(x, format_args!("set {name}: empty index"));
                        return Ok(());
                    }
                    _ => {
                        self.warn(x, format_args!("set {name}: multiple index"));
                        return Ok(());
                    }
                };
                let vals = self.expand(values, x)?;
                debug!(%name, %idx, ?vals, "set element");
                let ctx = x.ctx();
                if ctx.is_map(name) {
                    let mut m = ctx.map(name);
                    m.insert(idx.clone(), vals);
                    ctx.set_map(name, m);
                } else {
                    match set_list_el(ctx.list(name), idx, vals.join(" ")) {
                        Some(l) => ctx.set_list(name, l),
                        None => self.warn(x, format_args!("set {name}: bad index {idx}")),
                    }
                }
            }
            _ => return Err(malformed(node, "set")),
        }
        Ok(())
    }

    fn run_setmap(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [name] = node.args.as_slice() else {
            return Err(malformed(node, "setmap"));
        };
        let mut m = BTreeMap::new();
        for c in &node.children {
            let mut nms = self.expand(c, x)?.into_iter();
            if let Some(key) = nms.next() {
                m.insert(key, nms.collect());
            }
        }
        debug!(%name, ?m, "setmap");
        x.ctx().set_map(name, m);
        Ok(())
    }

    fn run_src(&self, node: &Arc<Node>, x: &mut Environment) -> Flow {
        let [file] = node.children.as_slice() else {
            return Err(malformed(node, "source"));
        };
        let nms = self.expand1(file, x)?;
        let [path] = nms.as_slice() else {
            self.warn(x, format_args!("source: expected one file name"));
            x.ctx().set_status("source: expected one file name");
            return Ok(());
        };
        let path = x.ctx().resolve(path);
        debug!(path = %path.display(), "source");
        let nodes = match self.loader().load(&path) {
            Ok(nodes) => nodes,
            Err(e) => {
                x.ctx().set_status(format!("{e:#}"));
                return Ok(());
            }
        };
        for n in &nodes {
            let mut cx = x.dup();
            let res = self.run_in(n, &mut cx);
            cx.close();
            if let Err(e) = res {
                if e.is_exit() {
                    return Err(e);
                }
            }
        }
        x.ctx().set_status("");
        Ok(())
    }

    fn run_func(&self, node: &Arc<Node>) -> Flow {
        let ([name], [_body]) = (node.args.as_slice(), node.children.as_slice()) else {
            return Err(malformed(node, "func"));
        };
        debug!(%name, "define function");
        self.define(name, node.clone());
        Ok(())
    }

    /// Run a user function with `argv` bound as its parameters.
    pub(crate) fn call_func(&self, func: &Arc<Node>, x: &mut Environment, argv: &[String]) -> Flow {
        let [body] = func.children.as_slice() else {
            return Err(malformed(func, "func"));
        };
        let ctx = x.ctx();
        ctx.set_list("argv0", argv[..1].to_vec());
        ctx.set_list("argv", argv[1..].to_vec());
        self.run_block(body, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Redirection;
    use crate::config::Config;
    use crate::stream::{StreamHandle, pipe};
    use crate::vars::Vars;
    use std::path::PathBuf;

    struct Harness {
        sh: Interpreter,
        x: Environment,
        out: StreamHandle,
        _err: StreamHandle,
    }

    impl Harness {
        fn new() -> Self {
            let sh = Interpreter::builder(Config::default().with_inherit_io(false))
                .vars(Vars::new())
                .dot(PathBuf::from("/"))
                .build()
                .unwrap();
            let mut x = Environment::empty(sh.ctx().clone());
            let (out, w) = pipe("out").unwrap();
            x.bind("out", w);
            let (_err, w) = pipe("err").unwrap();
            x.bind("err", w);
            Self { sh, x, out, _err }
        }

        fn run(&mut self, node: Node) -> Flow {
            self.sh.run_in(&Arc::new(node), &mut self.x)
        }

        fn output(self) -> Vec<String> {
            self.x.close();
            collect(&self.out).0
        }
    }

    fn cmd(words: &[&str]) -> Node {
        Node::pipe(vec![Node::words(words)])
    }

    fn block(cmds: Vec<Node>) -> Node {
        Node::block(cmds)
    }

    fn or(cmds: Vec<Node>) -> Node {
        Node::or(cmds)
    }

    #[test]
    fn pipeline_status_is_not_raised() {
        let mut h = Harness::new();
        assert_eq!(h.run(cmd(&["false"])), Ok(()));
        assert_eq!(h.sh.ctx().status(), "false");
        assert_eq!(h.run(cmd(&["true"])), Ok(()));
        assert_eq!(h.sh.ctx().status(), "");
    }

    #[test]
    fn exit_and_break_propagate_from_pipeline() {
        let mut h = Harness::new();
        assert_eq!(
            h.run(cmd(&["exit", "oops"])),
            Err(Interrupt::Exit("oops".into()))
        );
        assert_eq!(h.sh.ctx().status(), "oops");
        assert_eq!(h.run(cmd(&["break"])), Err(Interrupt::Break));
    }

    #[test]
    fn cond_runs_first_successful_clause() {
        let mut h = Harness::new();
        let node = Node::pipe(vec![Node::cond(vec![
            or(vec![cmd(&["false"]), cmd(&["echo", "one"])]),
            or(vec![cmd(&["false"]), cmd(&["echo", "two"])]),
            or(vec![cmd(&["true"]), cmd(&["echo", "three"])]),
        ])]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.sh.ctx().status(), "");
        assert_eq!(h.output(), vec!["three"]);
    }

    #[test]
    fn cond_stops_after_first_match() {
        let mut h = Harness::new();
        let node = Node::pipe(vec![Node::cond(vec![
            or(vec![cmd(&["true"]), cmd(&["echo", "one"])]),
            or(vec![cmd(&["false"]), cmd(&["echo", "two"])]),
        ])]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.output(), vec!["one"]);
    }

    #[test]
    fn cond_absorbs_break() {
        let mut h = Harness::new();
        let node = Node::pipe(vec![Node::cond(vec![
            or(vec![cmd(&["break"])]),
            or(vec![cmd(&["echo", "never"])]),
        ])]);
        assert_eq!(h.run(node), Ok(()));
        assert!(h.output().is_empty());
    }

    #[test]
    fn block_stops_silently_on_failed_construction() {
        let mut h = Harness::new();
        let bad = Node::pipe(vec![Node::words(&["echo", "x"]).redirect(
            Redirection::Pipe {
                from: "out".into(),
                to: "in".into(),
            },
        )]);
        let node = Node::pipe(vec![block(vec![
            cmd(&["echo", "a"]),
            bad,
            cmd(&["echo", "b"]),
        ])]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.output(), vec!["a"]);
    }

    #[test]
    fn for_iterates_values_and_breaks() {
        let mut h = Harness::new();
        let mut stop = BTreeMap::new();
        stop.insert("2".to_string(), vec!["break".to_string()]);
        h.sh.ctx().set_map("stop", stop);
        let header = Node::names(vec![
            Node::name("i"),
            Node::name("1"),
            Node::name("2"),
            Node::name("3"),
        ]);
        let body = block(vec![
            Node::pipe(vec![Node::cmd(Node::names(vec![
                Node::name("echo"),
                Node::val("i"),
            ]))]),
            Node::pipe(vec![Node::cmd(Node::names(vec![Node::val_index(
                "stop",
                Node::val("i"),
            )]))]),
        ]);
        let node = Node::pipe(vec![Node::for_loop(header, body)]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.sh.ctx().status(), "");
        assert_eq!(h.output(), vec!["1", "2"]);
    }

    #[test]
    fn for_reads_values_from_input() {
        let mut h = Harness::new();
        let producer = Node::words(&["echo", "x"]).redirect(Redirection::Pipe {
            from: "out".into(),
            to: "in".into(),
        });
        let body = block(vec![Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::app(Node::name("got-"), Node::val("v")),
        ]))])]);
        let node = Node::pipe(vec![
            producer,
            Node::for_loop(Node::names(vec![Node::name("v")]), body),
        ]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.output(), vec!["got-x"]);
    }

    #[test]
    fn for_binds_blank_records_as_empty() {
        let mut h = Harness::new();
        let producer = Node::words(&["echo", "a\n\nb"]).redirect(Redirection::Pipe {
            from: "out".into(),
            to: "in".into(),
        });
        let body = block(vec![Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::length("v"),
        ]))])]);
        let node = Node::pipe(vec![
            producer,
            Node::for_loop(Node::names(vec![Node::name("v")]), body),
        ]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.output(), vec!["1", "0", "1"]);
    }

    #[test]
    fn for_without_name_fails() {
        let mut h = Harness::new();
        let node = Node::pipe(vec![Node::for_loop(
            Node::names(vec![]),
            block(vec![cmd(&["true"])]),
        )]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.sh.ctx().status(), "no variable name");
    }

    #[test]
    fn while_runs_until_condition_fails() {
        let mut h = Harness::new();
        let mut ok = BTreeMap::new();
        ok.insert("0".to_string(), vec!["true".to_string()]);
        ok.insert("1".to_string(), vec!["true".to_string()]);
        h.sh.ctx().set_map("ok", ok);
        // runs true while $#n is a key of ok, then an empty command
        let cond = Node::pipe(vec![Node::cmd(Node::names(vec![Node::val_index(
            "ok",
            Node::length("n"),
        )]))]);
        let body = block(vec![Node::pipe(vec![Node::set(
            "n",
            Node::names(vec![Node::val("n"), Node::name("w")]),
        )])]);
        let node = Node::pipe(vec![Node::while_loop(cond, body)]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.sh.ctx().list("n"), vec!["w", "w"]);
        assert_eq!(h.sh.ctx().status(), "");
    }

    #[test]
    fn last_stage_shares_context_others_fork() {
        let mut h = Harness::new();
        let node = Node::pipe(vec![
            Node::set("a", Node::names(vec![Node::name("1")])).redirect(Redirection::Pipe {
                from: "out".into(),
                to: "in".into(),
            }),
            Node::set("b", Node::names(vec![Node::name("2")])),
        ]);
        assert_eq!(h.run(node), Ok(()));
        assert_eq!(h.sh.ctx().list("a"), Vec::<String>::new());
        assert_eq!(h.sh.ctx().list("b"), vec!["2"]);
    }

    #[test]
    fn set_elements_and_maps() {
        let mut h = Harness::new();
        h.run(Node::pipe(vec![Node::set(
            "l",
            Node::names(vec![Node::name("a")]),
        )]))
        .unwrap();
        h.run(Node::pipe(vec![Node::set_index(
            "l",
            Node::name("2"),
            Node::names(vec![Node::name("c"), Node::name("d")]),
        )]))
        .unwrap();
        assert_eq!(h.sh.ctx().list("l"), vec!["a", "", "c d"]);

        h.run(Node::pipe(vec![Node::set_map(
            "m",
            vec![
                Node::names(vec![Node::name("k"), Node::name("v1"), Node::name("v2")]),
                Node::names(vec![]),
                Node::names(vec![Node::name("j")]),
            ],
        )]))
        .unwrap();
        h.run(Node::pipe(vec![Node::set_index(
            "m",
            Node::name("z"),
            Node::names(vec![Node::name("q")]),
        )]))
        .unwrap();
        let m = h.sh.ctx().map("m");
        assert_eq!(m.len(), 3);
        assert_eq!(m["k"], vec!["v1", "v2"]);
        assert!(m["j"].is_empty());
        assert_eq!(m["z"], vec!["q"]);
    }

    #[test]
    fn functions_bind_arguments() {
        let mut h = Harness::new();
        let body = block(vec![Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::val("argv0"),
            Node::val("argv"),
        ]))])]);
        h.run(Node::func("greet", body)).unwrap();
        assert!(h.sh.function("greet").is_some());
        h.run(cmd(&["greet", "a", "b"])).unwrap();
        assert_eq!(h.output(), vec!["greet a b"]);
    }

    #[test]
    fn source_runs_loaded_nodes() {
        let tmp = tempfile::tempdir().unwrap();
        let script = vec![Node::pipe(vec![Node::set(
            "sourced",
            Node::names(vec![Node::name("yes")]),
        )])];
        std::fs::write(
            tmp.path().join("s.json"),
            serde_json::to_string(&script).unwrap(),
        )
        .unwrap();
        let mut h = Harness::new();
        h.sh.ctx().set_dot(tmp.path().to_path_buf());
        h.run(Node::source(Node::name("s.json"))).unwrap();
        assert_eq!(h.sh.ctx().list("sourced"), vec!["yes"]);
        assert_eq!(h.sh.ctx().status(), "");

        h.run(Node::source(Node::name("missing.json"))).unwrap();
        assert!(h.sh.ctx().status().starts_with("source: "));
    }

    #[test]
    fn malformed_pipe_exits() {
        let mut h = Harness::new();
        let bad = Node::new(NodeKind::Pipe, vec![], vec![Node::words(&["true"])]);
        assert!(h.run(bad).unwrap_err().is_exit());
        let bad = Node::pipe(vec![Node::pipe(vec![Node::words(&["true"])])]);
        assert_eq!(
            h.run(bad),
            Err(Interrupt::Exit("malformed pipe stage node".into()))
        );
    }
}
