//! Connection options and per-job parameters.
//!
//! [`Options`] is shared by every producer and request handle of a pool. It
//! is always passed through [`Options::sanitize`] before use, so a zeroed
//! field never reaches the network layer.
//!
//! [`PutParams`] carries the beanstalkd job parameters for a single `put`.

use core::time::Duration;

/// Default time allowed for establishing a broker connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a single command/response exchange.
pub const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a producer is given to finish its in-flight request when the
/// pool is stopped.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Default job priority. Lower values are more urgent.
pub const DEFAULT_PRIORITY: u32 = 1024;

/// Default time-to-run granted to a worker that reserves the job.
pub const DEFAULT_TTR: Duration = Duration::from_secs(60);

/// Settings shared by all connections of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Upper bound on opening a TCP connection to a broker.
    pub connect_timeout: Duration,
    /// Upper bound on one request/response exchange with the broker.
    pub read_write_timeout: Duration,
    /// How long [`Producer::stop`](crate::Producer::stop) waits for the
    /// servicing loop before aborting it.
    pub stop_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_write_timeout: DEFAULT_READ_WRITE_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl Options {
    /// Replaces unset (zero) durations with their defaults.
    #[must_use]
    pub fn sanitize(self) -> Self {
        let or_default = |value: Duration, default: Duration| {
            if value.is_zero() { default } else { value }
        };

        Self {
            connect_timeout: or_default(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT),
            read_write_timeout: or_default(self.read_write_timeout, DEFAULT_READ_WRITE_TIMEOUT),
            stop_timeout: or_default(self.stop_timeout, DEFAULT_STOP_TIMEOUT),
        }
    }
}

/// Job parameters sent with every `put` command.
///
/// `delay` and `ttr` travel as whole seconds; sub-second parts are truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutParams {
    pub priority: u32,
    pub delay: Duration,
    pub ttr: Duration,
}

impl Default for PutParams {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay: Duration::ZERO,
            ttr: DEFAULT_TTR,
        }
    }
}

impl PutParams {
    pub const fn new(priority: u32, delay: Duration, ttr: Duration) -> Self {
        Self {
            priority,
            delay,
            ttr,
        }
    }

    pub(crate) const fn delay_secs(&self) -> u64 {
        self.delay.as_secs()
    }

    /// The broker silently raises a ttr of 0 to 1; do it here so the value
    /// on the wire matches what will be applied.
    pub(crate) const fn ttr_secs(&self) -> u64 {
        let secs = self.ttr.as_secs();
        if secs == 0 { 1 } else { secs }
    }
}
