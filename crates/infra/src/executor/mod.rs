//! Code execution behind one swappable interface.
//!
//! The worker only sees [`CodeExecutor::run`]; whether the code runs in a
//! plain subprocess, a container or a micro-VM is the implementation's
//! business. Limits travel with every call.

use std::path::Path;

use async_trait::async_trait;

use byteme_core::{ExecutionLimits, ExecutionOutcome};

pub mod subprocess;

pub use subprocess::SubprocessExecutor;

/// Failure of the execution harness (not of the user's code).
///
/// A non-zero exit or a timeout is a normal `ExecutionOutcome`, not an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to materialize code: {0}")]
    Materialize(String),

    #[error("failed to start interpreter: {0}")]
    Spawn(String),

    #[error("failed to collect process output: {0}")]
    Io(String),
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn run(&self, code: &str, limits: &ExecutionLimits) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Source text placed before every submission (imports, helper functions).
///
/// Its content is opaque to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prelude(String);

impl Prelude {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn text(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::read_to_string(path).map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prelude followed by the submitted code.
    pub fn wrap(&self, code: &str) -> String {
        if self.0.is_empty() {
            return code.to_string();
        }
        let mut unit = String::with_capacity(self.0.len() + code.len() + 2);
        unit.push_str(&self.0);
        if !self.0.ends_with('\n') {
            unit.push('\n');
        }
        unit.push('\n');
        unit.push_str(code);
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prelude_leaves_code_untouched() {
        assert_eq!(Prelude::none().wrap("print(1)"), "print(1)");
    }

    #[test]
    fn prelude_is_separated_from_code() {
        let unit = Prelude::text("import math").wrap("print(math.pi)");
        assert_eq!(unit, "import math\n\nprint(math.pi)");
    }
}
