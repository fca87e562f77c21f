// src/client.rs
// Retry/backoff + token-bucket wrapper for every outbound call. Each external
// service gets its own client so one noisy upstream cannot starve the others.

use std::future::Future;
use std::sync::Mutex;

use metrics::{counter, histogram};
use rand::Rng;
use tokio::time::{sleep, timeout_at, Duration, Instant};

use crate::config::RetryPolicy;
use crate::error::CallError;

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or return how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Per-service call budget and retry behavior.
pub struct RateLimitedClient {
    service: &'static str,
    bucket: Mutex<TokenBucket>,
    policy: RetryPolicy,
    /// Wait for a token (true) or fail fast with `RateLimited` (false).
    wait_for_budget: bool,
}

impl RateLimitedClient {
    pub fn new(service: &'static str, capacity: f64, refill_per_sec: f64, policy: RetryPolicy) -> Self {
        Self {
            service,
            bucket: Mutex::new(TokenBucket::new(capacity, refill_per_sec)),
            policy,
            wait_for_budget: true,
        }
    }

    pub fn fail_fast(mut self) -> Self {
        self.wait_for_budget = false;
        self
    }

    /// Run `op` under the service budget, retrying transient failures with
    /// capped, jittered exponential backoff. Never sleeps past `deadline`;
    /// exceeding it surfaces `Timeout` and abandons remaining retries.
    /// Exhausted attempts surface `Unavailable`.
    pub async fn call<T, F, Fut>(&self, deadline: Instant, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.acquire_token(deadline).await?;

            if Instant::now() >= deadline {
                return Err(CallError::Timeout);
            }

            let started = Instant::now();
            let result = match timeout_at(deadline, op()).await {
                Ok(r) => r,
                Err(_) => Err(CallError::Timeout),
            };
            let elapsed = started.elapsed();
            histogram!("outbound_call_ms", "service" => self.service).record(elapsed.as_millis() as f64);

            match result {
                Ok(v) => {
                    counter!("outbound_calls_total", "service" => self.service, "outcome" => "ok")
                        .increment(1);
                    return Ok(v);
                }
                Err(e) => {
                    counter!("outbound_calls_total", "service" => self.service, "outcome" => "error")
                        .increment(1);
                    tracing::debug!(service = self.service, attempt, error = %e, "outbound call failed");

                    if !e.is_transient() {
                        return Err(e);
                    }
                    // A timeout caused by the deadline itself is final.
                    if Instant::now() >= deadline {
                        return Err(CallError::Timeout);
                    }

                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        counter!("outbound_retries_exhausted_total", "service" => self.service)
                            .increment(1);
                        return Err(CallError::Unavailable(format!(
                            "{} attempts exhausted ({})",
                            self.policy.max_attempts, e
                        )));
                    }

                    let delay = self.backoff_delay(attempt);
                    if Instant::now() + delay >= deadline {
                        return Err(CallError::Timeout);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn acquire_token(&self, deadline: Instant) -> Result<(), CallError> {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };
            if !self.wait_for_budget {
                counter!("outbound_rate_limited_total", "service" => self.service).increment(1);
                return Err(CallError::RateLimited);
            }
            if Instant::now() + wait >= deadline {
                return Err(CallError::Timeout);
            }
            sleep(wait).await;
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.base_delay_ms as f64;
        let raw = base * self.policy.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = raw.min(self.policy.max_delay_ms as f64);
        let jitter = self.policy.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::rng().random_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            multiplier: 2.0,
            jitter: 0.0,
            max_delay_ms: 50,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let client = RateLimitedClient::new("test", 10.0, 10.0, quick_policy());
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let out = client
            .call(deadline, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CallError::RateLimited)
                } else {
                    Ok(7u32)
                }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_is_not_retried() {
        let client = RateLimitedClient::new("test", 10.0, 10.0, quick_policy());
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let out: Result<(), _> = client
            .call(deadline, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Unavailable("down".into()))
            })
            .await;
        assert!(matches!(out, Err(CallError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_unavailable() {
        let client = RateLimitedClient::new("test", 10.0, 10.0, quick_policy());
        let deadline = Instant::now() + Duration::from_secs(5);
        let out: Result<(), _> = client
            .call(deadline, || async { Err(CallError::RateLimited) })
            .await;
        assert!(matches!(out, Err(CallError::Unavailable(_))));
    }

    #[tokio::test]
    async fn fail_fast_budget_rejects_over_capacity() {
        // One token, negligible refill: the second call must not wait.
        let client = RateLimitedClient::new("test", 1.0, 0.001, quick_policy()).fail_fast();
        let deadline = Instant::now() + Duration::from_secs(5);
        let first: Result<u32, _> = client.call(deadline, || async { Ok(1u32) }).await;
        assert_eq!(first, Ok(1));
        let second: Result<u32, _> = client.call(deadline, || async { Ok(2u32) }).await;
        assert_eq!(second, Err(CallError::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cuts_off_slow_call() {
        let client = RateLimitedClient::new("test", 10.0, 10.0, quick_policy());
        let deadline = Instant::now() + Duration::from_secs(1);
        let out: Result<(), _> = client
            .call(deadline, || async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert_eq!(out, Err(CallError::Timeout));
    }
}
