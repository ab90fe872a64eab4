use thiserror::Error;

/// Abnormal outcome of evaluating a node.
///
/// Normal completion is `Ok(())`. Only `Break` and `Exit` cross block and
/// loop boundaries; `Status` stops the current block or loop and turns into
/// status text when it reaches a task boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Interrupt {
    /// Leave the nearest enclosing `for` or `while`.
    #[error("break")]
    Break,
    /// Unwind the whole interpreter.
    #[error("{0}")]
    Exit(String),
    /// Any other failure; the text ends up in the status variable.
    #[error("{0}")]
    Status(String),
}

impl Interrupt {
    pub fn status(msg: impl Into<String>) -> Self {
        Interrupt::Status(msg.into())
    }

    /// True for the signals that unwind enclosing blocks.
    pub fn unwinds(&self) -> bool {
        matches!(self, Interrupt::Break | Interrupt::Exit(_))
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Interrupt::Exit(_))
    }
}

impl From<std::io::Error> for Interrupt {
    fn from(e: std::io::Error) -> Self {
        Interrupt::Status(e.to_string())
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(e: anyhow::Error) -> Self {
        Interrupt::Status(format!("{e:#}"))
    }
}

/// Result of evaluating a node.
pub type Flow = Result<(), Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn only_break_and_exit_unwind() {
        assert!(Interrupt::Break.unwinds());
        assert!(Interrupt::Exit("bye".into()).unwinds());
        assert!(!Interrupt::status("exit status 1").unwinds());
    }

    #[test]
    fn anyhow_context_is_kept() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("no such file")).context("cd: /nope");
        let sig: Interrupt = err.unwrap_err().into();
        assert_eq!(sig, Interrupt::status("cd: /nope: no such file"));
    }
}
