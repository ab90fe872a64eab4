use crate::env::Environment;
use crate::interpreter::Interpreter;
use crate::signal::Flow;

/// Object-safe trait for a command run inside the interpreter process.
///
/// Implemented by every builtin through a blanket impl.
pub trait ExecutableCommand {
    /// Run the command against the invoking environment.
    ///
    /// `Err(Interrupt::Status)` reports a failure; `Break` and `Exit` unwind
    /// the caller like any other evaluator signal.
    fn execute(self: Box<Self>, sh: &Interpreter, env: &mut Environment) -> Flow;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory: Send + Sync {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
