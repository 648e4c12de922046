//! Runtime settings.
//!
//! Defaults can be overridden from the environment:
//!
//! | variable                    | meaning                                   |
//! |-----------------------------|-------------------------------------------|
//! | `XFER_WORKER_THREADS`       | dispatcher worker count                   |
//! | `XFER_QUEUE_CAPACITY`       | dispatcher queue bound, `0` for unbounded |
//! | `XFER_CP_CHUNK_SIZE`        | classic copy chunk size in bytes          |
//! | `XFER_TPC_POLL_MS`          | third party copy progress poll interval   |
//! | `XFER_CONTINUE_ON_FAILURE`  | `1`/`true` to keep going after a failure  |
use std::{env, str::FromStr, time::Duration};

use crate::{
    Error,
    copy::{DEFAULT_CHUNK_SIZE, FailurePolicy},
    protocol::{DispatcherConfig, MAX_CHUNK_SIZE},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub chunk_size: usize,
    pub tpc_poll_interval: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            tpc_poll_interval: Duration::from_secs(1),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse(&lookup, "XFER_WORKER_THREADS")? {
            config.dispatcher.workers = workers;
        }
        if let Some(capacity) = parse::<usize, _>(&lookup, "XFER_QUEUE_CAPACITY")? {
            config.dispatcher.queue_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(chunk_size) = parse(&lookup, "XFER_CP_CHUNK_SIZE")? {
            config.chunk_size = chunk_size;
        }
        if let Some(ms) = parse(&lookup, "XFER_TPC_POLL_MS")? {
            config.tpc_poll_interval = Duration::from_millis(ms);
        }
        if let Some(value) = lookup("XFER_CONTINUE_ON_FAILURE") {
            config.failure_policy = match value.trim() {
                "1" | "true" | "yes" => FailurePolicy::ContinueOnFailure,
                "0" | "false" | "no" | "" => FailurePolicy::StopOnFirstFailure,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "XFER_CONTINUE_ON_FAILURE: unexpected value '{other}'"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.dispatcher.workers == 0 {
            return Err(Error::InvalidConfig("worker count must be positive".into()));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE} bytes"
            )));
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{name}: cannot parse '{raw}'")))
        })
        .transpose()
}
