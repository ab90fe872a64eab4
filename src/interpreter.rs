use crate::ast::Node;
use crate::command::{CommandFactory, ExecutableCommand};
use crate::config::Config;
use crate::context::Context;
use crate::env::{Environment, Inherited};
use crate::jobs::JobRegistry;
use crate::vars::Vars;
use anyhow::Context as _;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Loads the script named by a source-include.
///
/// Parsing is not done here; a loader hands back already built trees.
pub trait ScriptLoader: Send + Sync {
    fn load(&self, path: &Path) -> anyhow::Result<Vec<Arc<Node>>>;
}

/// Loads scripts stored as a JSON array of top-level nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLoader;

impl ScriptLoader for JsonLoader {
    fn load(&self, path: &Path) -> anyhow::Result<Vec<Arc<Node>>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("source: {}", path.display()))?;
        let nodes = serde_json::from_str(&text)
            .with_context(|| format!("source: {}: bad syntax tree", path.display()))?;
        Ok(nodes)
    }
}

struct Shared {
    config: Config,
    ctx: Context,
    inherited: Inherited,
    jobs: Arc<JobRegistry>,
    functions: RwLock<HashMap<String, Arc<Node>>>,
    builtins: Vec<Box<dyn CommandFactory>>,
    loader: Box<dyn ScriptLoader>,
}

/// The command interpreter.
///
/// Owns everything one interpreter instance needs: its top-level context,
/// the streams it inherited, the background job registry, user functions
/// and builtins. Cloning gives another handle to the same instance, which
/// is how pipeline stages running on other threads reach it.
///
/// ```no_run
/// use qlsh::{Config, Interpreter, Node};
/// use std::sync::Arc;
///
/// let sh = Interpreter::new(Config::default()).unwrap();
/// let cmd = Arc::new(Node::pipe(vec![Node::words(&["echo", "hello"])]));
/// sh.run(&cmd).unwrap();
/// assert_eq!(sh.ctx().status(), "");
/// ```
#[derive(Clone)]
pub struct Interpreter {
    shared: Arc<Shared>,
}

/// Builder for an [`Interpreter`] with non-default parts.
pub struct Builder {
    config: Config,
    vars: Option<Vars>,
    dot: Option<PathBuf>,
    builtins: Option<Vec<Box<dyn CommandFactory>>>,
    loader: Box<dyn ScriptLoader>,
}

impl Builder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            vars: None,
            dot: None,
            builtins: None,
            loader: Box::new(JsonLoader),
        }
    }

    /// Initial variables instead of the process environment.
    pub fn vars(mut self, vars: Vars) -> Self {
        self.vars = Some(vars);
        self
    }

    /// Initial working directory instead of the process' own.
    pub fn dot(mut self, dot: PathBuf) -> Self {
        self.dot = Some(dot);
        self
    }

    pub fn builtins(mut self, builtins: Vec<Box<dyn CommandFactory>>) -> Self {
        self.builtins = Some(builtins);
        self
    }

    pub fn loader(mut self, loader: impl ScriptLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn build(self) -> io::Result<Interpreter> {
        let env: Vec<(String, String)> = std::env::vars().collect();
        let inherited = Inherited::capture(env.iter().cloned(), self.config.inherit_io)?;
        let vars = self.vars.unwrap_or_else(|| Vars::from_env(env));
        let dot = match self.dot {
            Some(d) => d,
            None => std::env::current_dir()?,
        };
        Ok(Interpreter {
            shared: Arc::new(Shared {
                config: self.config,
                ctx: Context::new(vars, dot),
                inherited,
                jobs: Arc::new(JobRegistry::new()),
                functions: RwLock::new(HashMap::new()),
                builtins: self.builtins.unwrap_or_else(crate::builtin::defaults),
                loader: self.loader,
            }),
        })
    }
}

impl Interpreter {
    /// An interpreter over the process environment with the default builtins.
    pub fn new(config: Config) -> io::Result<Self> {
        Builder::new(config).build()
    }

    pub fn builder(config: Config) -> Builder {
        Builder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The top-level context: variables and working directory of the caller.
    pub fn ctx(&self) -> &Context {
        &self.shared.ctx
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.shared.jobs
    }

    /// A fresh top-level environment over the inherited streams.
    pub fn top_env(&self) -> Environment {
        Environment::new(&self.shared.inherited, self.shared.ctx.clone())
    }

    pub(crate) fn loader(&self) -> &dyn ScriptLoader {
        self.shared.loader.as_ref()
    }

    pub fn function(&self, name: &str) -> Option<Arc<Node>> {
        self.shared.functions.read().get(name).cloned()
    }

    pub(crate) fn define(&self, name: &str, func: Arc<Node>) {
        self.shared.functions.write().insert(name.to_string(), func);
    }

    pub(crate) fn builtin(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        self.shared
            .builtins
            .iter()
            .find_map(|f| f.try_create(name, args))
    }

    /// Report a recoverable problem on the environment's error stream.
    pub(crate) fn warn(&self, x: &Environment, args: fmt::Arguments<'_>) {
        let msg = fmt::format(args);
        warn!("{msg}");
        let _ = x.eprintf(format_args!("{}: {}\n", self.shared.config.name, msg));
    }
}
