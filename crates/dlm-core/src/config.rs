//! Lock manager configuration
//!
//! Values are fixed for the lifetime of a manager. They can be built in code
//! with the `with_*` methods or read from a `config::Config` under the `dlm.`
//! namespace.

use config::{Config, ConfigError};

use dlm_common::{
    DEFAULT_NAME, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MAX_MS, DEFAULT_RETRY_DELAY_MIN_MS,
    KEY_PREFIX, LockError, Result,
};

pub const ENDPOINTS_PROPERTY: &str = "dlm.endpoints";
pub const RETRY_COUNT_PROPERTY: &str = "dlm.retry.count";
pub const RETRY_DELAY_MIN_PROPERTY: &str = "dlm.retry.delay_min";
pub const RETRY_DELAY_MAX_PROPERTY: &str = "dlm.retry.delay_max";
pub const NAME_PROPERTY: &str = "dlm.name";
pub const SHORTCIRCUIT_PROPERTY: &str = "dlm.shortcircuit_on_quorum";
pub const KEY_PREFIX_PROPERTY: &str = "dlm.key_prefix";

/// Configuration for a [`LockManager`](crate::LockManager)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockManagerConfig {
    /// One node is created per endpoint
    pub endpoints: Vec<String>,
    /// Acquisition attempts before `lock` gives up
    pub retry_count: u32,
    /// Lower bound of the backoff between attempts, in milliseconds
    pub retry_delay_min_ms: u64,
    /// Upper bound (exclusive) of the backoff between attempts, in milliseconds
    pub retry_delay_max_ms: u64,
    /// Display name, used in logs and metric labels
    pub name: String,
    /// Decide an acquisition as soon as quorum is reached instead of waiting for every node
    pub shortcircuit_on_quorum: bool,
    /// Prefix prepended to resource names by the nodes
    pub key_prefix: String,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_min_ms: DEFAULT_RETRY_DELAY_MIN_MS,
            retry_delay_max_ms: DEFAULT_RETRY_DELAY_MAX_MS,
            name: DEFAULT_NAME.to_string(),
            shortcircuit_on_quorum: true,
            key_prefix: KEY_PREFIX.to_string(),
        }
    }
}

impl LockManagerConfig {
    pub fn new<S: Into<String>>(endpoints: impl IntoIterator<Item = S>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.retry_delay_min_ms = min_ms;
        self.retry_delay_max_ms = max_ms;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_shortcircuit_on_quorum(mut self, enabled: bool) -> Self {
        self.shortcircuit_on_quorum = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Read the manager configuration from application configuration.
    ///
    /// `dlm.endpoints` may be a list or a comma-separated string. Missing keys
    /// fall back to the defaults; numbers that do not fit their field are
    /// rejected.
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = Self::default();

        let endpoints = match config.get_array(ENDPOINTS_PROPERTY) {
            Ok(values) => values
                .into_iter()
                .map(|v| v.into_string())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| LockError::Config(e.to_string()))?,
            Err(_) => config
                .get_string(ENDPOINTS_PROPERTY)
                .map(|s| split_endpoints(&s))
                .unwrap_or_default(),
        };

        let parsed = Self {
            endpoints,
            retry_count: read_int(config, RETRY_COUNT_PROPERTY, defaults.retry_count)?,
            retry_delay_min_ms: read_int(
                config,
                RETRY_DELAY_MIN_PROPERTY,
                defaults.retry_delay_min_ms,
            )?,
            retry_delay_max_ms: read_int(
                config,
                RETRY_DELAY_MAX_PROPERTY,
                defaults.retry_delay_max_ms,
            )?,
            name: config.get_string(NAME_PROPERTY).unwrap_or(defaults.name),
            shortcircuit_on_quorum: config
                .get_bool(SHORTCIRCUIT_PROPERTY)
                .unwrap_or(defaults.shortcircuit_on_quorum),
            key_prefix: config
                .get_string(KEY_PREFIX_PROPERTY)
                .unwrap_or(defaults.key_prefix),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject configurations a manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(LockError::invalid_argument(
                "at least one endpoint must be configured",
            ));
        }
        if self.retry_delay_max_ms < self.retry_delay_min_ms {
            return Err(LockError::invalid_argument(format!(
                "retry delay max ({}ms) must be >= retry delay min ({}ms)",
                self.retry_delay_max_ms, self.retry_delay_min_ms
            )));
        }
        Ok(())
    }

    /// Quorum for the configured node count
    pub fn quorum(&self) -> usize {
        dlm_common::quorum(self.endpoints.len())
    }
}

/// Read an integer key into `T`, using `default` when the key is absent
fn read_int<T: TryFrom<i64>>(config: &Config, key: &str, default: T) -> Result<T> {
    match config.get_int(key) {
        Ok(value) => T::try_from(value)
            .map_err(|_| LockError::Config(format!("{} is out of range: {}", key, value))),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(LockError::Config(format!("{}: {}", key, e))),
    }
}

fn split_endpoints(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockManagerConfig::default();
        assert!(config.endpoints.is_empty());
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay_min_ms, 100);
        assert_eq!(config.retry_delay_max_ms, 300);
        assert_eq!(config.name, "default");
        assert!(config.shortcircuit_on_quorum);
        assert_eq!(config.key_prefix, "dlm:");
    }

    #[test]
    fn test_builder() {
        let config = LockManagerConfig::new(["a", "b", "c"])
            .with_retry_count(5)
            .with_retry_delay(10, 20)
            .with_name("orders")
            .with_shortcircuit_on_quorum(false)
            .with_key_prefix("locks:");

        assert_eq!(config.endpoints, vec!["a", "b", "c"]);
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_delay_min_ms, 10);
        assert_eq!(config.retry_delay_max_ms, 20);
        assert_eq!(config.name, "orders");
        assert!(!config.shortcircuit_on_quorum);
        assert_eq!(config.key_prefix, "locks:");
        assert_eq!(config.quorum(), 2);
    }

    #[test]
    fn test_validate() {
        assert!(LockManagerConfig::default().validate().is_err());
        assert!(LockManagerConfig::new(["a"]).validate().is_ok());
        assert!(
            LockManagerConfig::new(["a"])
                .with_retry_delay(300, 100)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_config_string_endpoints() {
        let config = Config::builder()
            .set_default(ENDPOINTS_PROPERTY, "redis://a:6379, redis://b:6379,redis://c:6379")
            .unwrap()
            .set_default(RETRY_COUNT_PROPERTY, 5)
            .unwrap()
            .set_default(NAME_PROPERTY, "billing")
            .unwrap()
            .set_default(SHORTCIRCUIT_PROPERTY, false)
            .unwrap()
            .build()
            .unwrap();

        let parsed = LockManagerConfig::from_config(&config).unwrap();
        assert_eq!(
            parsed.endpoints,
            vec!["redis://a:6379", "redis://b:6379", "redis://c:6379"]
        );
        assert_eq!(parsed.retry_count, 5);
        assert_eq!(parsed.retry_delay_min_ms, 100);
        assert_eq!(parsed.retry_delay_max_ms, 300);
        assert_eq!(parsed.name, "billing");
        assert!(!parsed.shortcircuit_on_quorum);
    }

    #[test]
    fn test_from_config_list_endpoints() {
        let config = Config::builder()
            .set_default(ENDPOINTS_PROPERTY, vec!["a", "b"])
            .unwrap()
            .set_default(RETRY_DELAY_MIN_PROPERTY, 5)
            .unwrap()
            .set_default(RETRY_DELAY_MAX_PROPERTY, 15)
            .unwrap()
            .build()
            .unwrap();

        let parsed = LockManagerConfig::from_config(&config).unwrap();
        assert_eq!(parsed.endpoints, vec!["a", "b"]);
        assert_eq!(parsed.retry_delay_min_ms, 5);
        assert_eq!(parsed.retry_delay_max_ms, 15);
    }

    #[test]
    fn test_from_config_rejects_out_of_range_numbers() {
        let build = |key: &str, value: config::Value| {
            Config::builder()
                .set_default(ENDPOINTS_PROPERTY, "a")
                .unwrap()
                .set_default(key, value)
                .unwrap()
                .build()
                .unwrap()
        };

        let too_many = build(RETRY_COUNT_PROPERTY, 5_000_000_000i64.into());
        assert!(matches!(
            LockManagerConfig::from_config(&too_many),
            Err(LockError::Config(_))
        ));

        let negative = build(RETRY_DELAY_MIN_PROPERTY, (-5i64).into());
        assert!(matches!(
            LockManagerConfig::from_config(&negative),
            Err(LockError::Config(_))
        ));

        let not_a_number = build(RETRY_DELAY_MAX_PROPERTY, "soon".into());
        assert!(matches!(
            LockManagerConfig::from_config(&not_a_number),
            Err(LockError::Config(_))
        ));

        let zero = build(RETRY_COUNT_PROPERTY, 0i64.into());
        assert_eq!(LockManagerConfig::from_config(&zero).unwrap().retry_count, 0);
    }

    #[test]
    fn test_from_config_missing_endpoints() {
        let config = Config::builder().build().unwrap();
        let err = LockManagerConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, LockError::InvalidArgument(_)));
    }
}
