use std::time::Duration;

const DEFAULT_BASE: Duration = Duration::from_secs(1);
const DEFAULT_CAP: Duration = Duration::from_secs(30);

/// Exponential delay policy: `min(cap, 2^attempt * base)`.
///
/// ```
/// use std::time::Duration;
///
/// let backoff = devsession::Backoff::default();
/// assert_eq!(Duration::from_secs(1), backoff.delay_for(0));
/// assert_eq!(Duration::from_secs(8), backoff.delay_for(3));
/// assert_eq!(Duration::from_secs(30), backoff.delay_for(5));
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP)
    }
}

impl Backoff {
    /// Creates a policy with an explicit base delay and cap.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Returns the delay to wait after the failed attempt numbered `attempt`.
    ///
    /// Attempts are counted from zero. Large attempt numbers saturate at the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}
