//! Execution engine of a small Plan 9 style command language.
//!
//! Takes already parsed syntax trees ([`Node`]) and runs them: pipelines
//! whose stages run concurrently, blocks, loops, conditionals, variable
//! assignment, io-blocks and background jobs. Commands are user functions,
//! builtins implemented in Rust, or external programs that receive their
//! extra named streams as inherited descriptors.
//!
//! The main entry point is [`Interpreter`]. Streams live in an
//! [`Environment`]; variables and the working directory live in a forkable
//! [`Context`]; background jobs are tracked by a [`JobRegistry`].

pub mod ast;
mod builtin;
pub mod command;
pub mod config;
pub mod context;
pub mod env;
mod eval;
mod expand;
mod interpreter;
pub mod jobs;
mod launch;
mod pipeline;
pub mod records;
pub mod signal;
pub mod stream;
pub mod task;
pub mod vars;

pub use ast::{FileMode, Node, NodeKind, Redirection};
pub use config::Config;
pub use context::Context;
pub use env::Environment;
pub use interpreter::{Builder, Interpreter, JsonLoader, ScriptLoader};
pub use jobs::JobRegistry;
pub use launch::find_command_path;
pub use signal::{Flow, Interrupt};
pub use stream::StreamHandle;
pub use vars::{Value, Vars};
