use std::env;

/// Interpreter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Program identity, used to prefix warnings.
    pub name: String,
    /// Adopt `cliveio#` stream bindings from the process environment.
    pub inherit_io: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "ql".to_string(),
            inherit_io: true,
        }
    }
}

impl Config {
    /// Defaults overridden by `QL_NAME` and `QL_INHERIT_IO`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(name) = env::var("QL_NAME") {
            if !name.is_empty() {
                cfg.name = name;
            }
        }
        if let Ok(v) = env::var("QL_INHERIT_IO") {
            cfg.inherit_io = !matches!(v.as_str(), "0" | "false" | "no");
        }
        cfg
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_inherit_io(mut self, inherit_io: bool) -> Self {
        self.inherit_io = inherit_io;
        self
    }
}
