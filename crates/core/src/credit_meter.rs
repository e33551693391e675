use std::time::Duration;

/// Projects billable credits from connected time.
///
/// The meter is sampled every `poll_interval` rather than continuously, so a call
/// can run up to one polling interval past the point where the balance was
/// exhausted. The resulting drift is bounded by the credits one interval is
/// worth: `ceil(poll_interval / 60s) * rate_per_minute`. The backend bills the
/// authoritative amount when the session is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditMeter {
    rate_per_minute: u32,
    grace: Duration,
    poll_interval: Duration,
}

impl CreditMeter {
    pub fn new(rate_per_minute: u32, grace: Duration, poll_interval: Duration) -> Self {
        Self {
            rate_per_minute,
            grace,
            poll_interval,
        }
    }

    pub fn rate_per_minute(&self) -> u32 {
        self.rate_per_minute
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// `ceil(max(0, elapsed - grace) / 60) * rate`, in whole seconds.
    pub fn projected_credits(&self, elapsed: Duration) -> i64 {
        let billable = elapsed.as_secs().saturating_sub(self.grace.as_secs());
        (billable.div_ceil(60) * u64::from(self.rate_per_minute)) as i64
    }

    pub fn should_terminate(&self, balance: i64, elapsed: Duration) -> bool {
        balance <= self.projected_credits(elapsed)
    }

    /// Upper bound on credits consumed between two polls.
    pub fn max_poll_drift(&self) -> i64 {
        (self.poll_interval.as_secs().div_ceil(60) * u64::from(self.rate_per_minute)) as i64
    }
}

impl Default for CreditMeter {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(59), Duration::from_secs(5))
    }
}
