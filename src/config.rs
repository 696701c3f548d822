use std::{env, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{GroupErr, Result};

/// Seconds a written key lives in the store unless configured otherwise.
pub const DEFAULT_DATA_EXPIRATION_SECONDS: u64 = 60;

/// Seconds a participant keeps trying to reach the store unless configured otherwise.
pub const DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS: u64 = 30;

const DEFAULT_HOST: &str = "127.0.0.1";

/// Everything a participant needs to know to join a group.
///
/// Every member of a group must agree on `host`, `port`, `world_size` and `namespace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub rank: usize,
    pub world_size: usize,
    /// Zero keeps keys until the store goes away.
    #[serde(default = "default_data_expiration_seconds")]
    pub data_expiration_seconds: u64,
    #[serde(default = "default_store_connect_timeout_seconds")]
    pub store_connect_timeout_seconds: u64,
    /// Upper bound for a barrier or a receive, waits forever when absent.
    #[serde(default)]
    pub wait_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_true")]
    pub wait_for_workers: bool,
    /// When false rank 0 joins an already running store instead of hosting one.
    #[serde(default = "default_true")]
    pub host_store: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_data_expiration_seconds() -> u64 {
    DEFAULT_DATA_EXPIRATION_SECONDS
}

fn default_store_connect_timeout_seconds() -> u64 {
    DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS
}

fn default_true() -> bool {
    true
}

impl GroupConfig {
    /// Creates a new `GroupConfig` with every optional setting at its default.
    ///
    /// # Arguments
    /// * `host` - The store's host, rank 0 listens there.
    /// * `port` - The store's port.
    /// * `rank` - This participant's index in the group.
    /// * `world_size` - The amount of participants in the group.
    pub fn new(host: impl Into<String>, port: u16, rank: usize, world_size: usize) -> Self {
        Self {
            host: host.into(),
            port,
            rank,
            world_size,
            data_expiration_seconds: DEFAULT_DATA_EXPIRATION_SECONDS,
            store_connect_timeout_seconds: DEFAULT_STORE_CONNECT_TIMEOUT_SECONDS,
            wait_timeout_seconds: None,
            namespace: None,
            wait_for_workers: true,
            host_store: true,
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// `PORT`, `RANK` and `WORLD_SIZE` are required; `HOST`, `DATA_EXPIRATION_SECONDS`,
    /// `STORE_TIMEOUT`, `WAIT_TIMEOUT`, `NAMESPACE`, `WAIT_FOR_WORKERS` and `HOST_STORE`
    /// are optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env` but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| GroupErr::InvalidConfiguration(format!("{name} is not set")))
        };

        let mut config = Self::new(
            lookup("HOST").unwrap_or_else(default_host),
            parse("PORT", &required("PORT")?)?,
            parse("RANK", &required("RANK")?)?,
            parse("WORLD_SIZE", &required("WORLD_SIZE")?)?,
        );

        if let Some(value) = lookup("DATA_EXPIRATION_SECONDS") {
            config.data_expiration_seconds = parse("DATA_EXPIRATION_SECONDS", &value)?;
        }

        if let Some(value) = lookup("STORE_TIMEOUT") {
            config.store_connect_timeout_seconds = parse("STORE_TIMEOUT", &value)?;
        }

        if let Some(value) = lookup("WAIT_TIMEOUT") {
            config.wait_timeout_seconds = Some(parse("WAIT_TIMEOUT", &value)?);
        }

        if let Some(value) = lookup("WAIT_FOR_WORKERS") {
            config.wait_for_workers = parse("WAIT_FOR_WORKERS", &value)?;
        }

        if let Some(value) = lookup("HOST_STORE") {
            config.host_store = parse("HOST_STORE", &value)?;
        }

        config.namespace = lookup("NAMESPACE").filter(|namespace| !namespace.is_empty());
        Ok(config)
    }

    /// Parses a JSON document into a `GroupConfig`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| GroupErr::InvalidConfiguration(e.to_string()))
    }

    /// Checks the rank is within the group.
    pub fn validate(&self) -> Result<()> {
        validate(self.rank, self.world_size)
    }

    pub fn data_expiration(&self) -> Option<Duration> {
        (self.data_expiration_seconds > 0).then(|| Duration::from_secs(self.data_expiration_seconds))
    }

    pub fn store_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.store_connect_timeout_seconds)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_seconds.map(Duration::from_secs)
    }
}

/// Checks `rank` and `world_size` describe a valid member of a group.
pub(crate) fn validate(rank: usize, world_size: usize) -> Result<()> {
    if world_size < 1 {
        return Err(GroupErr::InvalidConfiguration(
            "world_size must be at least 1".to_string(),
        ));
    }

    if rank >= world_size {
        return Err(GroupErr::InvalidConfiguration(format!(
            "rank {rank} must be lower than world_size {world_size}"
        )));
    }

    Ok(())
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GroupErr::InvalidConfiguration(format!("{name}={value:?}: {e}")))
}
