use qlsh::records::collect;
use qlsh::stream::pipe;
use qlsh::{
    Config, Environment, FileMode, Interpreter, Interrupt, Node, Redirection, StreamHandle, Vars,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Shell {
    sh: Interpreter,
    x: Environment,
    out: StreamHandle,
    err: StreamHandle,
}

impl Shell {
    fn new(dot: &Path) -> Self {
        let mut vars = Vars::new();
        vars.set_scalar("PATH", "/bin:/usr/bin");
        let sh = Interpreter::builder(Config::default().with_inherit_io(false))
            .vars(vars)
            .dot(dot.to_path_buf())
            .build()
            .unwrap();
        let mut x = Environment::empty(sh.ctx().clone());
        let (out, w) = pipe("out").unwrap();
        x.bind("out", w);
        let (err, w) = pipe("err").unwrap();
        x.bind("err", w);
        Self { sh, x, out, err }
    }

    fn run(&mut self, node: Node) -> Result<(), Interrupt> {
        self.sh.run_in(&Arc::new(node), &mut self.x)
    }

    fn finish(self) -> (Vec<String>, Vec<String>) {
        self.x.close();
        (collect(&self.out).0, collect(&self.err).0)
    }
}

fn to_in() -> Redirection {
    Redirection::Pipe {
        from: "out".into(),
        to: "in".into(),
    }
}

fn words(ws: &[&str]) -> Node {
    Node::names(ws.iter().map(|w| Node::name(w)).collect())
}

#[test]
fn background_pipeline_is_tracked_by_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let producer = Node::words(&["/bin/sh", "-c", "sleep 0.3; echo a"]).redirect(to_in());
    let filter = Node::for_loop(
        Node::names(vec![Node::name("v")]),
        Node::block(vec![Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::app(Node::name("got-"), Node::val("v")),
        ]))])]),
    );
    s.sh.ctx().set_status("stale");
    let started = Instant::now();
    assert_eq!(s.run(Node::bg_pipe("t1", vec![producer, filter])), Ok(()));
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(s.sh.ctx().status(), "");
    assert!(s.sh.jobs().has_tag("t1"));
    assert_eq!(s.sh.jobs().jobs().len(), 1);

    s.sh.jobs().wait("t1");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!s.sh.jobs().has_tag("t1"));
    assert!(s.sh.jobs().is_empty());
    // already done: both return at once
    s.sh.jobs().wait("t1");
    s.sh.jobs().wait("");

    // the job ran on a private context
    assert!(s.sh.ctx().list("v").is_empty());
    assert_eq!(s.finish().0, vec!["got-a"]);
}

#[test]
fn wait_all_blocks_for_anonymous_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    s.run(Node::bg_pipe(
        "&",
        vec![Node::words(&["/bin/sh", "-c", "sleep 0.2"])],
    ))
    .unwrap();
    let jobs = s.sh.jobs().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].tag, None);
    s.sh.jobs().wait("");
    assert!(s.sh.jobs().is_empty());
}

#[test]
fn stages_stream_into_external_programs() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let node = Node::pipe(vec![
        Node::words(&["echo", "hello", "world"]).redirect(to_in()),
        Node::words(&["tr", "a-z", "A-Z"]),
    ]);
    assert_eq!(s.run(node), Ok(()));
    assert_eq!(s.sh.ctx().status(), "");
    assert_eq!(s.finish().0, vec!["HELLO WORLD"]);
}

#[test]
fn failing_last_stage_sets_status_only() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let node = Node::pipe(vec![
        Node::words(&["echo", "x"]).redirect(to_in()),
        Node::words(&["/bin/sh", "-c", "cat >/dev/null; exit 2"]),
    ]);
    assert_eq!(s.run(node), Ok(()));
    assert_eq!(s.sh.ctx().status(), "exit status 2");
}

#[test]
fn io_capture_becomes_arguments() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let capture = Node::io_capture(vec![
        Node::pipe(vec![Node::words(&["echo", "a"])]),
        Node::pipe(vec![Node::words(&["/bin/sh", "-c", "echo b"])]),
    ]);
    let node = Node::pipe(vec![Node::cmd(Node::names(vec![
        Node::name("echo"),
        Node::app(capture, Node::name(".txt")),
    ]))]);
    assert_eq!(s.run(node), Ok(()));
    assert_eq!(s.finish().0, vec!["a.txt b.txt"]);
}

#[test]
fn io_binding_reaches_child_descriptor() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let feed = Node::io_bind(
        "<",
        "data",
        vec![Node::pipe(vec![Node::words(&["echo", "from block"])])],
    );
    let node = Node::pipe(vec![Node::cmd(Node::names(vec![
        Node::name("/bin/sh"),
        Node::name("-c"),
        Node::name(r#"echo "$0"; cat <&3"#),
        feed,
    ]))]);
    assert_eq!(s.run(node), Ok(()));
    assert_eq!(s.finish().0, vec!["|<data", "from block"]);
}

#[test]
fn file_redirections_follow_dot() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let write = |mode, word: &str| {
        Node::pipe(vec![Node::words(&["echo", word]).redirect(Redirection::File {
            stream: "out".into(),
            mode,
            path: Arc::new(Node::name("notes")),
        })])
    };
    s.run(write(FileMode::Truncate, "one")).unwrap();
    s.run(write(FileMode::Append, "two")).unwrap();
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("notes")).unwrap(),
        "one\ntwo\n"
    );

    let read_back = Node::pipe(vec![Node::for_loop(
        Node::names(vec![Node::name("l")]),
        Node::block(vec![Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::length("l"),
            Node::val("l"),
        ]))])]),
    )
    .redirect(Redirection::File {
        stream: "in".into(),
        mode: FileMode::Read,
        path: Arc::new(Node::name("notes")),
    })]);
    s.run(read_back).unwrap();
    assert_eq!(s.finish().0, vec!["1 one", "1 two"]);
}

#[test]
fn exit_unwinds_nested_constructs() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    let body = Node::block(vec![
        Node::pipe(vec![Node::cmd(Node::names(vec![
            Node::name("echo"),
            Node::val("i"),
        ]))]),
        Node::pipe(vec![Node::words(&["exit", "stop"])]),
        Node::pipe(vec![Node::words(&["echo", "unreachable"])]),
    ]);
    let node = Node::pipe(vec![Node::for_loop(words(&["i", "1", "2"]), body)]);
    assert_eq!(s.run(node), Err(Interrupt::Exit("stop".into())));
    assert_eq!(s.finish().0, vec!["1"]);
}

#[test]
fn trailing_set_reaches_caller() {
    let tmp = tempfile::tempdir().unwrap();
    let mut s = Shell::new(tmp.path());
    s.run(Node::pipe(vec![Node::set("x", words(&["a", "b"]))]))
        .unwrap();
    assert_eq!(s.sh.ctx().list("x"), vec!["a", "b"]);
    let concat = Node::app(Node::name("p-"), Node::val("x"));
    s.run(Node::pipe(vec![Node::cmd(Node::names(vec![
        Node::name("echo"),
        concat,
    ]))]))
    .unwrap();
    assert_eq!(s.finish().0, vec!["p-a p-b"]);
}

#[test]
fn cd_is_private_to_background_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let sub = tmp.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let mut s = Shell::new(tmp.path());
    s.run(Node::bg_pipe("cd", vec![Node::words(&["cd", "sub"])]))
        .unwrap();
    s.sh.jobs().wait("cd");
    assert_eq!(s.sh.ctx().dot(), tmp.path());
    s.run(Node::pipe(vec![Node::words(&["cd", "sub"])])).unwrap();
    assert_eq!(s.sh.ctx().dot(), sub.canonicalize().unwrap());
}
