//! Deadline enforcement around provider calls.
//!
//! Each call runs on its own named thread and the caller waits on a channel
//! with `recv_timeout`. A call that overruns is abandoned (its thread finishes
//! in the background and its result is dropped) and reported as
//! `ProviderError::Timeout`.
//!
//! Consecutive timeouts feed a [`CircuitBreaker`]. Once it opens, calls are
//! refused with `ProviderError::CircuitBreakerTripped` until the cooldown has
//! passed, so a hung provider does not collect one stranded thread per
//! request.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::warn;

use barvault_core::data::{CircuitBreaker, RemoteProvider};
use barvault_core::domain::{CorporateAction, Period, RawBar};
use barvault_core::ProviderError;

pub struct TimedProvider {
    inner: Arc<dyn RemoteProvider>,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl TimedProvider {
    pub fn new(inner: Arc<dyn RemoteProvider>, timeout: Duration, breaker_cooldown: Duration) -> Self {
        Self {
            inner,
            timeout,
            breaker: CircuitBreaker::new(breaker_cooldown),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn call<T, F>(&self, label: &str, f: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RemoteProvider) -> Result<T, ProviderError> + Send + 'static,
    {
        if !self.breaker.is_allowed() {
            return Err(ProviderError::CircuitBreakerTripped);
        }

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name(format!("barvault-fetch-{label}"))
            .spawn(move || {
                // The receiver may be gone after a timeout.
                let _ = tx.send(f(inner.as_ref()));
            })
            .map_err(|e| ProviderError::Io(format!("spawn fetch thread: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => {
                // Any answer, even an error, means the provider is responsive.
                self.breaker.record_success();
                result
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let after_ms = self.timeout.as_millis() as u64;
                warn!(provider = self.inner.name(), call = label, after_ms, "provider call timed out");
                self.breaker.record_failure();
                Err(ProviderError::Timeout { after_ms })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ProviderError::Other(format!("{label} call aborted without a result")))
            }
        }
    }
}

impl RemoteProvider for TimedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    ) -> Result<Vec<RawBar>, ProviderError> {
        let id = instrument_id.to_string();
        self.call("bars", move |p| p.fetch_bars(&id, start, end, period))
    }

    fn fetch_corporate_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError> {
        let id = instrument_id.to_string();
        self.call("actions", move |p| p.fetch_corporate_actions(&id, start, end))
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
