//! Configuration for the refresh engine.

use allowsync_core::{MergeMode, SourceKind};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Shortest refresh interval the scheduler will honor.
///
/// Shorter configured intervals are clamped up to this value.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Refresh interval used when none is configured.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the refresh engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    refresh_interval: Duration,
    /// How the two sources are merged.
    pub merge_mode: MergeMode,
    /// Which source wins duplicate identities in the union modes.
    pub union_precedence: SourceKind,
    /// Key of the distributed refresh lock.
    pub lock_key: String,
    /// Lifetime of an acquired lock token.
    pub lock_ttl: Duration,
    /// Whether a lock backend failure must skip the cycle (multi-replica
    /// deployments) rather than proceed unprotected.
    pub require_lock: bool,
    /// Key the committed snapshot is mirrored under.
    pub mirror_key: String,
    /// Lifetime of the mirrored value.
    pub mirror_ttl: Duration,
    /// Retry configuration for mirror writes.
    pub retry: RetryConfig,
    /// How long shutdown waits for an in-flight cycle.
    pub shutdown_grace: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            merge_mode: MergeMode::default(),
            union_precedence: SourceKind::Remote,
            lock_key: "allowsync:refresh-lock".into(),
            lock_ttl: Duration::from_secs(30),
            require_lock: false,
            mirror_key: "allowsync:snapshot".into(),
            mirror_ttl: Duration::from_secs(24 * 60 * 60),
            retry: RetryConfig::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Returns the effective refresh interval, clamped to
    /// [`MIN_REFRESH_INTERVAL`].
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval.max(MIN_REFRESH_INTERVAL)
    }

    /// Returns the interval exactly as configured.
    pub fn configured_refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Returns true if the configured interval was below the floor.
    pub fn interval_clamped(&self) -> bool {
        self.refresh_interval < MIN_REFRESH_INTERVAL
    }

    /// Sets the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the merge mode.
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// Sets which source wins union ties.
    pub fn with_union_precedence(mut self, winner: SourceKind) -> Self {
        self.union_precedence = winner;
        self
    }

    /// Sets the lock key.
    pub fn with_lock_key(mut self, key: impl Into<String>) -> Self {
        self.lock_key = key.into();
        self
    }

    /// Sets the lock token lifetime.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Requires the lock backend for every cycle.
    pub fn with_require_lock(mut self, require: bool) -> Self {
        self.require_lock = require;
        self
    }

    /// Sets the mirror key.
    pub fn with_mirror_key(mut self, key: impl Into<String>) -> Self {
        self.mirror_key = key.into();
        self
    }

    /// Sets the mirrored value lifetime.
    pub fn with_mirror_ttl(mut self, ttl: Duration) -> Self {
        self.mirror_ttl = ttl;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay.
    pub base_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed):
    /// `base * attempt * multiplier`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let secs = self.base_delay.as_secs_f64() * f64::from(attempt) * self.multiplier;
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Total time spent sleeping when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// What the local loader reports when the file does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingFilePolicy {
    /// A missing file means the source is unavailable.
    #[default]
    Unavailable,
    /// A missing file means zero identities.
    Empty,
}

impl fmt::Display for MissingFilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingFilePolicy::Unavailable => f.write_str("unavailable"),
            MissingFilePolicy::Empty => f.write_str("empty"),
        }
    }
}

impl FromStr for MissingFilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unavailable" => Ok(MissingFilePolicy::Unavailable),
            "empty" => Ok(MissingFilePolicy::Empty),
            other => Err(format!("unknown missing-file policy: {other}")),
        }
    }
}

/// Configuration for the local file source.
#[derive(Debug, Clone)]
pub struct LocalSourceConfig {
    /// Path to the identity file.
    pub path: PathBuf,
    /// Behavior when the file is missing.
    pub missing: MissingFilePolicy,
}

impl LocalSourceConfig {
    /// Creates a local source configuration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            missing: MissingFilePolicy::default(),
        }
    }

    /// Sets the missing-file policy.
    pub fn with_missing_policy(mut self, policy: MissingFilePolicy) -> Self {
        self.missing = policy;
        self
    }
}

/// Credentials sent with the remote request.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum RemoteAuth {
    /// No credentials.
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// A custom header carrying an API key.
    ApiKey {
        /// Header name.
        header: String,
        /// Header value.
        value: String,
    },
}

impl RemoteAuth {
    /// Returns the header this credential adds, if any.
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            RemoteAuth::None => None,
            RemoteAuth::Bearer(token) => {
                Some(("Authorization".to_string(), format!("Bearer {token}")))
            }
            RemoteAuth::ApiKey { header, value } => Some((header.clone(), value.clone())),
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAuth::None => f.write_str("None"),
            RemoteAuth::Bearer(_) => f.write_str("Bearer(***)"),
            RemoteAuth::ApiKey { header, .. } => write!(f, "ApiKey({header}: ***)"),
        }
    }
}

/// Configuration for the remote HTTP source.
#[derive(Debug, Clone)]
pub struct RemoteSourceConfig {
    /// Endpoint URL.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Credentials.
    pub auth: RemoteAuth,
}

impl RemoteSourceConfig {
    /// Creates a remote source configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
            auth: RemoteAuth::None,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the credentials.
    pub fn with_auth(mut self, auth: RemoteAuth) -> Self {
        self.auth = auth;
        self
    }
}
