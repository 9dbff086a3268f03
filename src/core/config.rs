//! # Runtime configuration.
//!
//! [`Config`] bundles the settings of every component. Build it with
//! [`Config::default`], adjust fields directly, or read it from `WORLDTICK_*`
//! environment variables with [`Config::from_env`].
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited (no semaphore created)
//! - `worker_timeout = 0s` / `priority_timeout = 0s` → no deadline
//! - `grace = 0s` → do not wait for components after shutdown
//!
//! ## Environment
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `WORLDTICK_SCHEDULER_ENABLED` | `scheduler.enabled` | bool |
//! | `WORLDTICK_DISPATCH_ENABLED` | `dispatch.enabled` | bool |
//! | `WORLDTICK_GENERATION_ENABLED` | `generation.enabled` | bool |
//! | `WORLDTICK_TICK_INTERVAL_MS` | `scheduler.interval` | ms |
//! | `WORLDTICK_INTERVAL_MODE` | `scheduler.interval_mode` | `from_start` \| `from_end` |
//! | `WORLDTICK_MAX_CONCURRENT` | `scheduler.max_concurrent` | usize |
//! | `WORLDTICK_WORKER_TIMEOUT_MS` | `scheduler.worker_timeout` | ms |
//! | `WORLDTICK_PRIORITY_TIMEOUT_MS` | `scheduler.priority_timeout` | ms |
//! | `WORLDTICK_GRACE_MS` | `grace` | ms |
//! | `WORLDTICK_REQUEST_CAPACITY` | `generation.capacity` | usize |
//! | `WORLDTICK_REQUEST_WORKERS` | `generation.workers` | usize |
//! | `WORLDTICK_BUS_CAPACITY` | `bus_capacity` | usize |
//! | `WORLDTICK_LOG_FORMAT` | `log_format` | `json` \| `pretty` |

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::generation::{ContentPolicy, OverflowPolicy};
use crate::observability::LogFormat;
use crate::policies::BackoffPolicy;

/// How the scheduler measures the tick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalMode {
    /// Next cycle starts `interval` after the previous one *started*.
    /// An overrunning cycle is followed immediately by the next one.
    #[default]
    FromStart,
    /// Sleep a full `interval` after each cycle *ends*.
    FromEnd,
}

impl FromStr for IntervalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "from_start" | "start" => Ok(IntervalMode::FromStart),
            "from_end" | "end" => Ok(IntervalMode::FromEnd),
            other => Err(format!(
                "unknown interval mode '{other}' (expected from_start|from_end)"
            )),
        }
    }
}

/// Tick scheduler settings.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Run the scheduler at all.
    pub enabled: bool,
    /// Time between cycles (see [`IntervalMode`]).
    pub interval: Duration,
    pub interval_mode: IntervalMode,
    /// Normal workers running at once (`0` = unlimited).
    pub max_concurrent: usize,
    /// Per-worker deadline for normal workers (`0s` = none).
    pub worker_timeout: Duration,
    /// Deadline for the priority worker (`0s` = none).
    pub priority_timeout: Duration,
}

impl SchedulerConfig {
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent != 0).then_some(self.max_concurrent)
    }

    #[inline]
    pub fn worker_deadline(&self) -> Option<Duration> {
        non_zero(self.worker_timeout)
    }

    #[inline]
    pub fn priority_deadline(&self) -> Option<Duration> {
        non_zero(self.priority_timeout)
    }
}

impl Default for SchedulerConfig {
    /// `interval = 5s`, `FromStart`, `max_concurrent = 4`,
    /// `worker_timeout = 10s`, `priority_timeout = 15s`.
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            interval_mode: IntervalMode::FromStart,
            max_concurrent: 4,
            worker_timeout: Duration::from_secs(10),
            priority_timeout: Duration::from_secs(15),
        }
    }
}

/// Dispatch consumer settings.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Run the dispatch consumer. When disabled, enqueued events stay queued.
    pub enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Fan-out hub settings.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Per-sink bounded queue size used when a sink does not choose its own.
    pub sink_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sink_queue_capacity: 1024,
        }
    }
}

/// Generation request pool and validation pipeline settings.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Run the request pool.
    pub enabled: bool,
    /// Request queue capacity.
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    /// Pool size (min 1).
    pub workers: usize,
    /// Bound on the whole attempt loop of one request.
    pub overall_timeout: Duration,
    /// Bound on a single generation call.
    pub attempt_timeout: Duration,
    /// Attempts per request (min 1).
    pub max_attempts: u32,
    /// Delay after a transient service error.
    pub backoff: BackoffPolicy,
    /// Language the reask prompt demands.
    pub language: String,
    /// Text of the terminal event when nothing was accepted.
    pub fallback_text: String,
    pub policy: ContentPolicy,
}

impl Default for GenerationConfig {
    /// `capacity = 1000`, `DropOldest`, `workers = 4`, `overall = 15s`,
    /// `attempt = 8s`, `max_attempts = 3`.
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            overflow: OverflowPolicy::DropOldest,
            workers: 4,
            overall_timeout: Duration::from_secs(15),
            attempt_timeout: Duration::from_secs(8),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            language: "English".to_string(),
            fallback_text: "...".to_string(),
            policy: ContentPolicy::default(),
        }
    }
}

/// Global configuration for the runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum wait for components to stop after shutdown is requested.
    ///
    /// If exceeded, [`Runtime::run`](crate::Runtime::run) returns
    /// `RuntimeError::GraceExceeded`.
    pub grace: Duration,
    /// Ring buffer size of every broadcast channel (min 1; clamped by `Bus`).
    pub bus_capacity: usize,
    pub log_format: LogFormat,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub hub: HubConfig,
    pub generation: GenerationConfig,
}

impl Default for Config {
    /// `grace = 30s`, `bus_capacity = 1024`, pretty logs, component defaults.
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            log_format: LogFormat::Pretty,
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            hub: HubConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    /// Reads `WORLDTICK_*` variables from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), with a custom variable source.
    ///
    /// # Example
    /// ```
    /// use std::collections::HashMap;
    /// use std::time::Duration;
    /// use worldtick::Config;
    ///
    /// let vars = HashMap::from([("WORLDTICK_TICK_INTERVAL_MS", "250")]);
    /// let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
    /// assert_eq!(cfg.scheduler.interval, Duration::from_millis(250));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut cfg = Config::default();

        env.apply("WORLDTICK_SCHEDULER_ENABLED", parse_bool, &mut cfg.scheduler.enabled)?;
        env.apply("WORLDTICK_DISPATCH_ENABLED", parse_bool, &mut cfg.dispatch.enabled)?;
        env.apply("WORLDTICK_GENERATION_ENABLED", parse_bool, &mut cfg.generation.enabled)?;
        env.apply("WORLDTICK_TICK_INTERVAL_MS", parse_ms, &mut cfg.scheduler.interval)?;
        env.apply("WORLDTICK_INTERVAL_MODE", parse_from_str, &mut cfg.scheduler.interval_mode)?;
        env.apply("WORLDTICK_MAX_CONCURRENT", parse_from_str, &mut cfg.scheduler.max_concurrent)?;
        env.apply("WORLDTICK_WORKER_TIMEOUT_MS", parse_ms, &mut cfg.scheduler.worker_timeout)?;
        env.apply("WORLDTICK_PRIORITY_TIMEOUT_MS", parse_ms, &mut cfg.scheduler.priority_timeout)?;
        env.apply("WORLDTICK_GRACE_MS", parse_ms, &mut cfg.grace)?;
        env.apply("WORLDTICK_REQUEST_CAPACITY", parse_from_str, &mut cfg.generation.capacity)?;
        env.apply("WORLDTICK_REQUEST_WORKERS", parse_from_str, &mut cfg.generation.workers)?;
        env.apply("WORLDTICK_BUS_CAPACITY", parse_from_str, &mut cfg.bus_capacity)?;
        env.apply("WORLDTICK_LOG_FORMAT", parse_from_str, &mut cfg.log_format)?;

        Ok(cfg)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn apply<T>(
        &self,
        key: &str,
        parse: fn(&str) -> Result<T, String>,
        slot: &mut T,
    ) -> Result<(), ConfigError> {
        let Some(raw) = (self.0)(key) else {
            return Ok(());
        };
        *slot = parse(&raw).map_err(|reason| ConfigError::invalid(key, &raw, reason))?;
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected a boolean (true/false/1/0)".to_string()),
    }
}

fn parse_ms(raw: &str) -> Result<Duration, String> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| format!("expected milliseconds: {e}"))
}

fn parse_from_str<T>(raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| e.to_string())
}

fn non_zero(d: Duration) -> Option<Duration> {
    (d != Duration::ZERO).then_some(d)
}
