use crate::command::{CommandFactory, ExecutableCommand};
use crate::env::Environment;
use crate::interpreter::Interpreter;
use crate::signal::{Flow, Interrupt};
use anyhow::Context;
use argh::{EarlyExit, FromArgs};
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Built-in commands known to the interpreter at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// directly in-process against the invoking environment's streams.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    fn execute(self, sh: &Interpreter, env: &mut Environment) -> Flow;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, sh: &Interpreter, env: &mut Environment) -> Flow {
        <T as BuiltinCommand>::execute(*self, sh, env)
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, _sh: &Interpreter, env: &mut Environment) -> Flow {
        if self.is_error {
            env.eprintf(format_args!("{}\n", self.output))?;
            Err(Interrupt::status("usage"))
        } else {
            env.printf(format_args!("{}\n", self.output))?;
            Ok(())
        }
    }
}

/// Creates builtin `T` when invoked by its name.
pub struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        Some(match T::from_args(&[name], args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// The default builtin set.
pub fn defaults() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<True>::default()),
        Box::new(Factory::<False>::default()),
        Box::new(Factory::<Break>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Wait>::default()),
        Box::new(Factory::<Jobs>::default()),
    ]
}

#[derive(FromArgs)]
/// write the arguments to the output stream, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, _sh: &Interpreter, env: &mut Environment) -> Flow {
        let s = self.args.join(" ");
        if self.no_newline {
            env.printf(format_args!("{s}"))?;
        } else {
            env.printf(format_args!("{s}\n"))?;
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// Print the current working directory.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, _sh: &Interpreter, env: &mut Environment) -> Flow {
        env.printf(format_args!("{}\n", env.ctx().dot().display()))?;
        Ok(())
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory named by $home or $HOME.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _sh: &Interpreter, env: &mut Environment) -> Flow {
        let ctx = env.ctx();
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => ["home", "HOME"]
                .iter()
                .map(|v| ctx.scalar(v))
                .find(|h| !h.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| Interrupt::status("cd: no target and home not set"))?,
        };
        let new_dir = ctx.resolve(target);
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;
        if !canonical.is_dir() {
            return Err(Interrupt::status(format!(
                "cd: {}: not a directory",
                canonical.display()
            )));
        }
        ctx.set_dot(canonical);
        Ok(())
    }
}

#[derive(FromArgs)]
/// Do nothing, successfully.
pub struct True {}

impl BuiltinCommand for True {
    fn name() -> &'static str {
        "true"
    }

    fn execute(self, _sh: &Interpreter, _env: &mut Environment) -> Flow {
        Ok(())
    }
}

#[derive(FromArgs)]
/// Do nothing, unsuccessfully.
pub struct False {}

impl BuiltinCommand for False {
    fn name() -> &'static str {
        "false"
    }

    fn execute(self, _sh: &Interpreter, _env: &mut Environment) -> Flow {
        Err(Interrupt::status("false"))
    }
}

#[derive(FromArgs)]
/// Leave the innermost loop.
pub struct Break {}

impl BuiltinCommand for Break {
    fn name() -> &'static str {
        "break"
    }

    fn execute(self, _sh: &Interpreter, _env: &mut Environment) -> Flow {
        Err(Interrupt::Break)
    }
}

#[derive(FromArgs)]
/// Exit the interpreter; a message means failure.
pub struct Exit {
    #[argh(positional, greedy)]
    /// exit status text.
    pub message: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _sh: &Interpreter, _env: &mut Environment) -> Flow {
        Err(Interrupt::Exit(self.message.join(" ")))
    }
}

#[derive(FromArgs)]
/// Wait for the background job with the given tag, or for all of them.
pub struct Wait {
    #[argh(positional)]
    /// job tag.
    pub tag: Option<String>,
}

impl BuiltinCommand for Wait {
    fn name() -> &'static str {
        "wait"
    }

    fn execute(self, sh: &Interpreter, _env: &mut Environment) -> Flow {
        sh.jobs().wait(self.tag.as_deref().unwrap_or(""));
        Ok(())
    }
}

#[derive(FromArgs)]
/// List background jobs still running.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, sh: &Interpreter, env: &mut Environment) -> Flow {
        for job in sh.jobs().jobs() {
            env.printf(format_args!(
                "[{}] {}\n",
                job.id,
                job.tag.as_deref().unwrap_or("&")
            ))?;
        }
        Ok(())
    }
}
