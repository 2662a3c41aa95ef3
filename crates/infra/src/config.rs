//! Process configuration loaded from the environment.
//!
//! Every setting has a default so a bare `byteme-gateway` / `byteme-worker`
//! pair talks to a local Redis with the documented protocol constants
//! (30s execution limit, 60 x 1s polling, 1h result TTL).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use byteme_core::ExecutionLimits;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which queue/store implementation the process wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Redis Streams queue + Redis key/value store.
    Redis,
    /// In-process queue and store; the gateway runs embedded workers.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("expected `redis` or `memory`, got `{other}`")),
        }
    }
}

/// Where job identifiers come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobIdPolicy {
    /// The client's `timestamp` is the identifier (collisions possible).
    ClientSupplied,
    /// The gateway mints a UUIDv7 per submission.
    ServerMinted,
}

impl FromStr for JobIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Self::ClientSupplied),
            "server" => Ok(Self::ServerMinted),
            other => Err(format!("expected `client` or `server`, got `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Queue (stream) name.
    pub name: String,
    /// Redis consumer group shared by all workers.
    pub consumer_group: String,
    /// Deliveries after which a job is dead-lettered.
    pub max_deliveries: u32,
    /// Idle time after which an unacknowledged job is reclaimed.
    pub claim_idle: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "code_execution".to_string(),
            consumer_group: "workers".to_string(),
            max_deliveries: 5,
            claim_idle: Duration::from_secs(60),
        }
    }
}

impl QueueSettings {
    pub fn dead_letter_name(&self) -> String {
        format!("{}:dlq", self.name)
    }
}

/// Gateway poll loop bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            attempts: 60,
        }
    }
}

impl PollSettings {
    /// Longest a client waits after a successful enqueue.
    pub fn window(&self) -> Duration {
        self.interval * self.attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: Backend,
    pub redis_url: String,
    pub bind_addr: SocketAddr,
    pub queue: QueueSettings,
    pub result_ttl: Duration,
    pub poll: PollSettings,
    pub limits: ExecutionLimits,
    pub interpreter: String,
    pub prelude_file: Option<PathBuf>,
    pub job_ids: JobIdPolicy,
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: Backend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            queue: QueueSettings::default(),
            result_ttl: Duration::from_secs(3600),
            poll: PollSettings::default(),
            limits: ExecutionLimits::default(),
            interpreter: "python3".to_string(),
            prelude_file: None,
            job_ids: JobIdPolicy::ClientSupplied,
            workers: 1,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load settings from an arbitrary variable source (tests use a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };
        let defaults = Settings::default();

        let redis_url = match env.raw("REDIS_URL") {
            Some(url) => url,
            None => {
                let host = env.raw("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
                let port: u16 = env.parse("REDIS_PORT")?.unwrap_or(6379);
                format!("redis://{host}:{port}")
            }
        };

        let queue = QueueSettings {
            name: env.raw("BYTEME_QUEUE_NAME").unwrap_or(defaults.queue.name),
            consumer_group: env
                .raw("BYTEME_CONSUMER_GROUP")
                .unwrap_or(defaults.queue.consumer_group),
            max_deliveries: env
                .parse("BYTEME_MAX_DELIVERIES")?
                .unwrap_or(defaults.queue.max_deliveries),
            claim_idle: env
                .parse("BYTEME_CLAIM_IDLE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue.claim_idle),
        };

        let poll = PollSettings {
            interval: env
                .parse("BYTEME_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll.interval),
            attempts: env.parse("BYTEME_POLL_ATTEMPTS")?.unwrap_or(defaults.poll.attempts),
        };

        let limits = ExecutionLimits {
            wall_clock: env
                .parse("BYTEME_EXEC_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.limits.wall_clock),
            max_output_bytes: env
                .parse("BYTEME_MAX_OUTPUT_BYTES")?
                .unwrap_or(defaults.limits.max_output_bytes),
            memory_bytes: env.parse("BYTEME_MEMORY_LIMIT_BYTES")?,
        };

        let settings = Settings {
            backend: env.parse("BYTEME_BACKEND")?.unwrap_or(defaults.backend),
            redis_url,
            bind_addr: env.parse("BYTEME_BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            queue,
            result_ttl: env
                .parse("BYTEME_RESULT_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.result_ttl),
            poll,
            limits,
            interpreter: env.raw("BYTEME_INTERPRETER").unwrap_or(defaults.interpreter),
            prelude_file: env.raw("BYTEME_PRELUDE_FILE").map(PathBuf::from),
            job_ids: env.parse("BYTEME_JOB_IDS")?.unwrap_or(defaults.job_ids),
            workers: env.parse("BYTEME_WORKERS")?.unwrap_or(defaults.workers),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |var: &'static str, ok: bool, value: String| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    var,
                    value,
                    reason: "must be greater than zero".to_string(),
                })
            }
        };

        positive("BYTEME_POLL_ATTEMPTS", self.poll.attempts > 0, self.poll.attempts.to_string())?;
        positive(
            "BYTEME_POLL_INTERVAL_MS",
            !self.poll.interval.is_zero(),
            self.poll.interval.as_millis().to_string(),
        )?;
        positive(
            "BYTEME_EXEC_TIMEOUT_SECS",
            !self.limits.wall_clock.is_zero(),
            self.limits.wall_clock.as_secs().to_string(),
        )?;
        positive(
            "BYTEME_RESULT_TTL_SECS",
            !self.result_ttl.is_zero(),
            self.result_ttl.as_secs().to_string(),
        )?;
        positive("BYTEME_WORKERS", self.workers > 0, self.workers.to_string())?;
        positive(
            "BYTEME_MAX_DELIVERIES",
            self.queue.max_deliveries > 0,
            self.queue.max_deliveries.to_string(),
        )
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty raw value.
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(var) {
            None => Ok(None),
            Some(value) => value.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
