//! Admission control for upload sessions.
//!
//! Two independent gates sit in front of every new session:
//! - A token bucket bounding the rate of admission attempts
//! - A single-flight flag allowing one active session per process
//!
//! The rate limiter is consulted first, so every attempt spends a token even
//! when the service turns out to be busy. Admission hands back an
//! [`AdmissionPermit`]; dropping it releases the slot, which makes release
//! happen exactly once on every exit path.

use crate::error::UploadError;
use crate::metrics;
use cask_core::config::AdmissionConfig;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why an admission attempt was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A session is already in flight.
    Busy,
    /// Too many attempts; retry after the given number of seconds.
    RateLimited { retry_after_secs: u64 },
}

impl From<Rejection> for UploadError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Busy => UploadError::RejectedBusy,
            Rejection::RateLimited { retry_after_secs } => {
                UploadError::RejectedRateLimited { retry_after_secs }
            }
        }
    }
}

/// Process-wide admission state.
pub struct AdmissionController {
    limiter: DefaultDirectRateLimiter,
    in_flight: Arc<AtomicBool>,
}

impl AdmissionController {
    /// Create a controller from configuration.
    pub fn new(config: &AdmissionConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: RateLimiter::direct(quota),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Try to admit a new session.
    pub fn try_admit(&self) -> Result<AdmissionPermit, Rejection> {
        if let Err(not_until) = self.limiter.check() {
            let wait_time = not_until.wait_time_from(DefaultClock::default().now());
            metrics::UPLOAD_SESSIONS_RATE_LIMITED.inc();
            tracing::debug!(
                wait_ms = wait_time.as_millis() as u64,
                "Upload admission rate limited"
            );
            return Err(Rejection::RateLimited {
                retry_after_secs: wait_time.as_secs() + 1,
            });
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics::UPLOAD_SESSIONS_REJECTED_BUSY.inc();
            tracing::debug!("Upload admission rejected, session already in flight");
            return Err(Rejection::Busy);
        }

        metrics::UPLOAD_SESSIONS_ADMITTED.inc();
        metrics::ACTIVE_UPLOAD_SESSIONS.inc();
        Ok(AdmissionPermit {
            in_flight: self.in_flight.clone(),
        })
    }

    /// Whether a session currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Proof of admission. The slot is released when this is dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    in_flight: Arc<AtomicBool>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
        metrics::ACTIVE_UPLOAD_SESSIONS.dec();
        tracing::debug!("Upload admission slot released");
    }
}
