use std::time::Duration;

use bon::Builder;

use crate::backoff::Backoff;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_PAIR_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const DEFAULT_SCAN_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_SCAN_CACHE_TTL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 5;
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_MAX_MISSED_PONGS: u32 = 3;

/// Timeouts and limits for session-level operations.
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    /// Default deadline for a connect request.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// Deadline for a disconnect request.
    #[builder(default = DEFAULT_DISCONNECT_TIMEOUT)]
    disconnect_timeout: Duration,
    /// Deadline for a pair request.
    #[builder(default = DEFAULT_PAIR_TIMEOUT)]
    pair_timeout: Duration,
    /// Extra time allowed on top of the requested scan duration.
    #[builder(default = DEFAULT_SCAN_TIMEOUT_MARGIN)]
    scan_timeout_margin: Duration,
    /// How long completed scan results are served from cache.
    #[builder(default = DEFAULT_SCAN_CACHE_TTL)]
    scan_cache_ttl: Duration,
    /// Retries after a transport failure or timeout while scanning.
    #[builder(default = 1)]
    scan_retries: u32,
    /// Delay policy between scan retries.
    #[builder(default = Backoff::new(Duration::from_millis(500), Duration::from_secs(5)))]
    scan_retry_backoff: Backoff,
    /// Maximum number of persisted connection-history entries.
    #[builder(default = DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,
    /// Whether connect probes peripheral availability first.
    #[builder(default = true)]
    probe_before_connect: bool,
    /// Upper bound on the availability probe. Counts against the connect deadline.
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }

    #[must_use]
    pub fn pair_timeout(&self) -> Duration {
        self.pair_timeout
    }

    #[must_use]
    pub fn scan_timeout_margin(&self) -> Duration {
        self.scan_timeout_margin
    }

    #[must_use]
    pub fn scan_cache_ttl(&self) -> Duration {
        self.scan_cache_ttl
    }

    #[must_use]
    pub fn scan_retries(&self) -> u32 {
        self.scan_retries
    }

    #[must_use]
    pub fn scan_retry_backoff(&self) -> Backoff {
        self.scan_retry_backoff
    }

    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    #[must_use]
    pub fn probe_before_connect(&self) -> bool {
        self.probe_before_connect
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }
}

/// Settings for the realtime push channel.
#[derive(Debug, Clone, Builder)]
pub struct ChannelConfig {
    /// Endpoint the transport connects to.
    #[builder(into)]
    url: String,
    /// Interval between heartbeat pings while the link is open.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL)]
    heartbeat_interval: Duration,
    /// Reconnect delay policy.
    #[builder(default)]
    backoff: Backoff,
    /// Consecutive unanswered pings after which the link is dropped.
    ///
    /// Zero disables the check and relies on the transport's close event.
    #[builder(default = DEFAULT_MAX_MISSED_PONGS)]
    max_missed_pongs: u32,
    /// Capacity of the outbound command queue.
    #[builder(default = 64)]
    command_capacity: usize,
}

impl ChannelConfig {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    #[must_use]
    pub fn max_missed_pongs(&self) -> Option<u32> {
        (self.max_missed_pongs > 0).then_some(self.max_missed_pongs)
    }

    pub(crate) fn command_capacity(&self) -> usize {
        self.command_capacity.max(1)
    }
}
