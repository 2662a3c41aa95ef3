//! Background workers and the wiring that turns `Settings` into running ones.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::executor::{CodeExecutor, Prelude, SubprocessExecutor};
use crate::queue::{JobQueue, QueueError};
use crate::result_store::{ResultStore, StoreError};

pub mod execution_worker;

pub use execution_worker::{ExecutionWorker, Processed, WorkerConfig, WorkerHandle, WorkerStats};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to load prelude {}: {reason}", path.display())]
    Prelude { path: PathBuf, reason: String },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Subprocess executor configured from settings (interpreter + prelude file).
pub fn executor_from_settings(settings: &Settings) -> Result<SubprocessExecutor, WorkerError> {
    let prelude = match &settings.prelude_file {
        None => Prelude::none(),
        Some(path) => Prelude::from_file(path).map_err(|e| WorkerError::Prelude {
            path: path.clone(),
            reason: e.to_string(),
        })?,
    };
    Ok(SubprocessExecutor::new(settings.interpreter.clone(), prelude))
}

impl WorkerConfig {
    pub fn from_settings(settings: &Settings, name: impl Into<String>) -> Self {
        Self::default()
            .with_name(name)
            .with_limits(settings.limits.clone())
            .with_result_ttl(settings.result_ttl)
    }
}

/// Spawn one worker per queue handle.
///
/// Consumer names are `<prefix>-<n>`; they must be unique across every
/// process sharing the queue.
pub fn spawn_workers(
    settings: &Settings,
    prefix: &str,
    queues: Vec<Arc<dyn JobQueue>>,
    store: Arc<dyn ResultStore>,
    executor: Arc<dyn CodeExecutor>,
) -> Vec<WorkerHandle> {
    queues
        .into_iter()
        .enumerate()
        .map(|(n, queue)| {
            let config = WorkerConfig::from_settings(settings, format!("{prefix}-{n}"));
            ExecutionWorker::new(queue, store.clone(), executor.clone(), config).spawn()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn prelude_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "import math").unwrap();
        let settings = Settings {
            prelude_file: Some(file.path().to_path_buf()),
            ..Settings::default()
        };
        assert!(executor_from_settings(&settings).is_ok());
    }

    #[test]
    fn missing_prelude_file_names_the_path() {
        let settings = Settings {
            prelude_file: Some(PathBuf::from("/nonexistent/prelude.py")),
            ..Settings::default()
        };
        let err = executor_from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/prelude.py"));
    }

    #[test]
    fn worker_config_follows_settings() {
        let settings = Settings::default();
        let config = WorkerConfig::from_settings(&settings, "w-0");
        assert_eq!(config.name, "w-0");
        assert_eq!(config.limits, settings.limits);
        assert_eq!(config.result_ttl, settings.result_ttl);
    }
}
