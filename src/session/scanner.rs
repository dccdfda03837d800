use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use super::context::SessionContext;
use super::controller::with_deadline;
use crate::api::{DeviceApi, DiscoveredPeripheral, ScanParams, ScanResponse};
use crate::error::{ApiError, SessionError};
use crate::events::{EventKind, EventPayload};

const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);
const MIN_SCAN_DURATION: Duration = Duration::from_secs(1);

/// Parameters of one discovery run.
#[derive(Debug, Clone, Copy, Builder)]
pub struct ScanRequest {
    /// How long the backend scans. Sent rounded up to whole seconds.
    #[builder(default = DEFAULT_SCAN_DURATION)]
    duration: Duration,
    /// Active scanning requests scan responses from peripherals.
    #[builder(default = true)]
    active: bool,
    /// Serve a fresh cached result instead of scanning.
    #[builder(default = true)]
    use_cache: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanRequest {
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    fn duration_seconds(&self) -> u64 {
        let whole = self.duration.as_secs();
        if self.duration.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        }
    }
}

#[derive(Debug)]
struct ScanCache {
    results: Vec<DiscoveredPeripheral>,
    fetched_at: Instant,
}

/// Runs discovery scans with a short-lived read-through cache.
#[derive(Debug, Clone)]
pub struct Scanner {
    context: SessionContext,
    api: Arc<dyn DeviceApi>,
    cache: Arc<Mutex<Option<ScanCache>>>,
}

impl Scanner {
    #[must_use]
    pub fn new(context: SessionContext, api: Arc<dyn DeviceApi>) -> Self {
        Self {
            context,
            api,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns discovered peripherals in discovery order.
    ///
    /// With `use_cache`, a non-empty result younger than the cache TTL is
    /// returned without a remote call. Otherwise a scan is issued with a
    /// deadline of the scan duration plus the configured margin; transport
    /// failures and timeouts are retried with backoff. Entries without an
    /// address are dropped. A failed scan clears the previous results.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ScanInFlight`] when another scan is running, or
    /// [`SessionError::Api`] when the scan fails after all retries.
    #[instrument(skip(self), level = "info")]
    pub async fn scan(&self, request: ScanRequest) -> Result<Vec<DiscoveredPeripheral>, SessionError> {
        let bus = self.context.bus();
        if request.use_cache
            && let Some(cached) = self.cached_results()
        {
            debug!(count = cached.len(), "serving scan results from cache");
            bus.emit(
                EventKind::ScanCompleted,
                EventPayload::ScanCompleted {
                    count: cached.len(),
                    from_cache: true,
                },
            );
            return Ok(cached);
        }

        let state = self.context.state();
        let Some(_in_flight) = state.try_begin_scan() else {
            warn!("scan rejected, another scan is in flight");
            return Err(SessionError::ScanInFlight);
        };

        let params = ScanParams::new(request.duration_seconds(), request.active);
        bus.emit(
            EventKind::ScanStarted,
            EventPayload::ScanStarted {
                duration_secs: params.duration_seconds(),
                active: params.active(),
            },
        );

        match self.fetch_with_retries(params, request.duration).await {
            Ok(response) => {
                let received = response.devices.len();
                let peripherals = response
                    .devices
                    .iter()
                    .filter_map(DiscoveredPeripheral::from_wire)
                    .collect::<Vec<_>>();
                if peripherals.len() < received {
                    warn!(
                        dropped = received - peripherals.len(),
                        "ignored malformed scan entries"
                    );
                }

                state.replace_scan_results(peripherals.clone());
                *self.lock_cache() = Some(ScanCache {
                    results: peripherals.clone(),
                    fetched_at: Instant::now(),
                });
                self.context
                    .preferences()
                    .set_scan_cache_timestamp(OffsetDateTime::now_utc());
                bus.emit(
                    EventKind::ScanCompleted,
                    EventPayload::ScanCompleted {
                        count: peripherals.len(),
                        from_cache: false,
                    },
                );
                info!(count = peripherals.len(), "scan completed");
                Ok(peripherals)
            }
            Err(error) => {
                state.clear_scan_results();
                self.lock_cache().take();
                let message = error.user_message();
                warn!(%message, "scan failed");
                bus.emit(
                    EventKind::ScanError,
                    EventPayload::Failure {
                        address: None,
                        message,
                        reason: error.reason(),
                    },
                );
                Err(error.into())
            }
        }
    }

    /// Passive, cache-first scan that halves the duration when a scan
    /// completed within the cache TTL.
    ///
    /// # Errors
    ///
    /// Same as [`Scanner::scan`].
    pub async fn scan_power_efficient(
        &self,
        duration: Duration,
    ) -> Result<Vec<DiscoveredPeripheral>, SessionError> {
        let ttl = self.context.config().scan_cache_ttl();
        let recently_scanned = self
            .context
            .preferences()
            .scan_cache_timestamp()
            .and_then(|at| Duration::try_from(OffsetDateTime::now_utc() - at).ok())
            .is_some_and(|elapsed| elapsed < ttl);
        let duration = if recently_scanned {
            (duration / 2).max(MIN_SCAN_DURATION)
        } else {
            duration
        };
        debug!(recently_scanned, ?duration, "power-efficient scan");

        self.scan(
            ScanRequest::builder()
                .duration(duration)
                .active(false)
                .use_cache(true)
                .build(),
        )
        .await
    }

    /// Drops cached results so the next scan goes to the backend.
    pub fn clear_cache(&self) {
        self.lock_cache().take();
        self.context.preferences().clear_scan_cache_timestamp();
    }

    fn cached_results(&self) -> Option<Vec<DiscoveredPeripheral>> {
        let ttl = self.context.config().scan_cache_ttl();
        let cache = self.lock_cache();
        cache
            .as_ref()
            .filter(|cache| !cache.results.is_empty() && cache.fetched_at.elapsed() < ttl)
            .map(|cache| cache.results.clone())
    }

    async fn fetch_with_retries(
        &self,
        params: ScanParams,
        duration: Duration,
    ) -> Result<ScanResponse, ApiError> {
        let config = self.context.config();
        let deadline = duration + config.scan_timeout_margin();
        let backoff = config.scan_retry_backoff();
        let mut attempt = 0u32;

        loop {
            match with_deadline(deadline, self.api.scan(params)).await {
                Err(error) if attempt < config.scan_retries() && is_retryable(&error) => {
                    let delay = backoff.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error.user_message(),
                        "scan attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<ScanCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_retryable(error: &ApiError) -> bool {
    matches!(error, ApiError::Timeout { .. } | ApiError::Transport(_))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Duration::from_secs(5), 5)]
    #[case(Duration::from_millis(1_500), 2)]
    #[case(Duration::from_millis(200), 1)]
    fn scan_duration_rounds_up_to_whole_seconds(#[case] duration: Duration, #[case] expected: u64) {
        let request = ScanRequest::builder().duration(duration).build();
        assert_eq!(expected, request.duration_seconds());
    }

    #[test]
    fn default_request_is_active_and_cached() {
        let request = ScanRequest::default();
        assert_eq!(Duration::from_secs(5), request.duration());
        assert!(request.active());
        assert!(request.use_cache());
    }

    #[rstest]
    #[case(ApiError::Timeout { after: Duration::from_secs(1) }, true)]
    #[case(ApiError::Remote { status: 500, message: "boom".into() }, false)]
    #[case(ApiError::InvalidBaseUrl { url: "x".into() }, false)]
    fn only_transient_errors_are_retried(#[case] error: ApiError, #[case] expected: bool) {
        assert_eq!(expected, is_retryable(&error));
    }
}
