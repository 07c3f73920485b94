//! Configuration for the pool and the worker binary

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pool::ObjectPoolConfig;

/// Receives worker health failures in addition to `tracing`
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// How to launch a worker process
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerCommand {
    pub bin_path: PathBuf,
    pub args: Vec<String>,
    /// Deadline for the worker's announce line
    #[serde(with = "millis")]
    pub start_timeout: Duration,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            bin_path: PathBuf::from("pdf-worker"),
            args: Vec::new(),
            start_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerCommand {
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Pool configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_idle: usize,
    pub max_idle: usize,
    pub max_total: usize,
    pub command: WorkerCommand,
    /// Grace period for a worker to exit after `Shutdown`
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    /// Default deadline for `DocumentPool::open`
    #[serde(with = "millis")]
    pub borrow_timeout: Duration,
    /// Zero disables the maintenance task
    #[serde(with = "millis")]
    pub maintenance_interval: Duration,
    #[serde(skip)]
    pub log_callback: Option<LogCallback>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_idle: 1,
            max_total: 1,
            command: WorkerCommand::default(),
            close_timeout: Duration::from_secs(5),
            borrow_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(1),
            log_callback: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min_idle", &self.min_idle)
            .field("max_idle", &self.max_idle)
            .field("max_total", &self.max_total)
            .field("command", &self.command)
            .field("close_timeout", &self.close_timeout)
            .field("borrow_timeout", &self.borrow_timeout)
            .field("maintenance_interval", &self.maintenance_interval)
            .field("log_callback", &self.log_callback.is_some())
            .finish()
    }
}

impl PoolConfig {
    /// Load from the environment, honoring a `.env` file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source; missing keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let duration = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_millis(parse_var(&lookup, key, default.as_millis() as u64)?))
        };

        let config = Self {
            min_idle: parse_var(&lookup, "PDF_POOL_MIN_IDLE", defaults.min_idle)?,
            max_idle: parse_var(&lookup, "PDF_POOL_MAX_IDLE", defaults.max_idle)?,
            max_total: parse_var(&lookup, "PDF_POOL_MAX_TOTAL", defaults.max_total)?,
            command: WorkerCommand {
                bin_path: lookup("PDF_WORKER_BIN")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.command.bin_path),
                args: lookup("PDF_WORKER_ARGS")
                    .map(|args| args.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                start_timeout: duration("PDF_WORKER_START_TIMEOUT_MS", defaults.command.start_timeout)?,
            },
            close_timeout: duration("PDF_WORKER_CLOSE_TIMEOUT_MS", defaults.close_timeout)?,
            borrow_timeout: duration("PDF_POOL_BORROW_TIMEOUT_MS", defaults.borrow_timeout)?,
            maintenance_interval: duration("PDF_POOL_MAINTENANCE_MS", defaults.maintenance_interval)?,
            log_callback: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_log_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log_callback = Some(Arc::new(callback));
        self
    }

    /// Check the sizing invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(Error::Config("max_total must be at least 1".into()));
        }
        if self.min_idle > self.max_idle {
            return Err(Error::Config(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.max_idle > self.max_total {
            return Err(Error::Config(format!(
                "max_idle ({}) exceeds max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.command.bin_path.as_os_str().is_empty() {
            return Err(Error::Config("worker binary path is empty".into()));
        }
        Ok(())
    }

    pub(crate) fn object_pool_config(&self) -> ObjectPoolConfig {
        ObjectPoolConfig {
            min_idle: self.min_idle,
            max_idle: self.max_idle,
            max_total: self.max_total,
            test_on_create: true,
            test_on_borrow: true,
            test_on_return: true,
            maintenance_interval: (!self.maintenance_interval.is_zero())
                .then_some(self.maintenance_interval),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

/// Engine backend hosted by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Memory,
    Mupdf,
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(EngineKind::Memory),
            "mupdf" => Ok(EngineKind::Mupdf),
            other => Err(Error::Config(format!("unknown engine {:?}", other))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Memory => f.write_str("memory"),
            EngineKind::Mupdf => f.write_str("mupdf"),
        }
    }
}

/// Settings of the `pdf-worker` binary
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    pub engine: EngineKind,
}

impl WorkerSettings {
    /// `--engine <name>` wins over `PDF_WORKER_ENGINE`
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        Self::parse(args, std::env::var("PDF_WORKER_ENGINE").ok())
    }

    fn parse<I>(args: I, env_engine: Option<String>) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut engine = env_engine.map(|name| name.parse()).transpose()?;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if let Some(name) = arg.strip_prefix("--engine=") {
                engine = Some(name.parse()?);
            } else if arg == "--engine" {
                let name = args
                    .next()
                    .ok_or_else(|| Error::Config("--engine needs a value".into()))?;
                engine = Some(name.parse()?);
            } else {
                return Err(Error::Config(format!("unexpected argument {:?}", arg)));
            }
        }

        Ok(Self {
            engine: engine.unwrap_or_default(),
        })
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        config.validate().unwrap();
        assert_eq!((config.min_idle, config.max_idle, config.max_total), (1, 1, 1));
        assert_eq!(config.command.start_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_lookup() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("PDF_POOL_MIN_IDLE", "0"),
            ("PDF_POOL_MAX_IDLE", "2"),
            ("PDF_POOL_MAX_TOTAL", "4"),
            ("PDF_WORKER_BIN", "/opt/bin/pdf-worker"),
            ("PDF_WORKER_ARGS", "--engine  memory"),
            ("PDF_POOL_BORROW_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!((config.min_idle, config.max_idle, config.max_total), (0, 2, 4));
        assert_eq!(config.command.bin_path, PathBuf::from("/opt/bin/pdf-worker"));
        assert_eq!(config.command.args, vec!["--engine", "memory"]);
        assert_eq!(config.borrow_timeout, Duration::from_millis(250));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PoolConfig::from_lookup(lookup(&[("PDF_POOL_MAX_TOTAL", "lots")])).unwrap_err();
        assert!(err.to_string().contains("PDF_POOL_MAX_TOTAL"));
    }

    #[test]
    fn test_validate() {
        let mut config = PoolConfig::default();
        config.max_total = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = PoolConfig::default();
        config.min_idle = 2;
        assert!(config.validate().is_err());

        let mut config = PoolConfig::default();
        config.max_idle = 3;
        config.max_total = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: PoolConfig = serde_json::from_str(
            r#"{ "max_total": 3, "max_idle": 2, "command": { "bin_path": "w", "start_timeout": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(config.max_total, 3);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.command.start_timeout, Duration::from_secs(1));
        assert!(config.log_callback.is_none());
    }

    #[test]
    fn test_maintenance_can_be_disabled() {
        let mut config = PoolConfig::default();
        config.maintenance_interval = Duration::ZERO;
        assert!(config.object_pool_config().maintenance_interval.is_none());
    }

    #[test]
    fn test_worker_settings() {
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(WorkerSettings::parse(args(&[]), None).unwrap().engine, EngineKind::Memory);
        assert_eq!(
            WorkerSettings::parse(args(&["--engine", "mupdf"]), None).unwrap().engine,
            EngineKind::Mupdf
        );
        assert_eq!(
            WorkerSettings::parse(args(&["--engine=memory"]), Some("mupdf".into()))
                .unwrap()
                .engine,
            EngineKind::Memory
        );
        assert_eq!(
            WorkerSettings::parse(args(&[]), Some("MUPDF".into())).unwrap().engine,
            EngineKind::Mupdf
        );
        assert!(WorkerSettings::parse(args(&["--engine"]), None).is_err());
        assert!(WorkerSettings::parse(args(&["--engine", "pdfium"]), None).is_err());
    }
}
