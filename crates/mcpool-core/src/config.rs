//! Pool configuration
//!
//! Durations serialize as integer milliseconds so the pool section can sit
//! inside a host application's JSON config unchanged.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Default idle timeout (5 minutes)
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default reclaimer polling interval
const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Default graceful-shutdown window
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum time a caller may hold a connection before it is treated as leaked
const DEFAULT_MAX_LEASE_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default re-check interval while waiting for releases during shutdown
const DEFAULT_SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning knobs supplied when the pool is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle connections unused for longer than this are closed by the reclaimer
    #[serde(with = "serde_ms")]
    pub idle_timeout: Duration,
    /// How often the reclaimer sweeps
    #[serde(with = "serde_ms")]
    pub reclaim_interval: Duration,
    /// How long `close()` waits for outstanding connections to be released
    #[serde(with = "serde_ms")]
    pub grace_period: Duration,
    /// Upper bound for establishing a brand-new connection
    #[serde(with = "serde_ms")]
    pub connect_timeout: Duration,
    /// Active connections held longer than this are force-closed as leaks.
    /// `None` disables lease expiry.
    #[serde(with = "serde_ms::option")]
    pub max_lease_duration: Option<Duration>,
    /// Upper bound between re-checks while `close()` waits for releases
    #[serde(with = "serde_ms")]
    pub shutdown_poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_lease_duration: Some(DEFAULT_MAX_LEASE_DURATION),
            shutdown_poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_lease_duration(mut self, max: Option<Duration>) -> Self {
        self.max_lease_duration = max;
        self
    }

    pub fn with_shutdown_poll_interval(mut self, interval: Duration) -> Self {
        self.shutdown_poll_interval = interval;
        self
    }

    /// Reject zero durations, which would make the reclaimer spin or
    /// evict connections the moment they are released.
    pub fn validate(&self) -> Result<(), PoolError> {
        let checks = [
            ("idle_timeout", self.idle_timeout),
            ("reclaim_interval", self.reclaim_interval),
            ("connect_timeout", self.connect_timeout),
            ("shutdown_poll_interval", self.shutdown_poll_interval),
        ];
        for (name, value) in checks {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if matches!(self.max_lease_duration, Some(d) if d.is_zero()) {
            return Err(PoolError::InvalidConfig(
                "max_lease_duration must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `Duration` <-> integer milliseconds
pub(crate) mod serde_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
