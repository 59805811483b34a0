use std::sync::Mutex;
use std::time::Instant;

/// Token bucket gating outbound sends per channel. Refill is computed lazily
/// from elapsed time, so an idle bucket costs nothing.
#[derive(Debug)]
pub struct TokenBucket {
    rate_per_sec: f64,
    burst: f64,
    inner: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> TokenBucket {
        TokenBucket {
            rate_per_sec,
            burst,
            inner: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(self.burst);
        state.last_refill = now;
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_is_spent_then_denied() {
        let bucket = TokenBucket::new(10.0, 2.0);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        assert!(!bucket.try_acquire_at(now));
    }

    #[test]
    fn tokens_refill_with_elapsed_time() {
        let bucket = TokenBucket::new(2.0, 1.0);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now));
        assert!(!bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now + Duration::from_millis(500)));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let bucket = TokenBucket::new(100.0, 2.0);
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now + Duration::from_secs(60)));
        assert!(bucket.try_acquire_at(now + Duration::from_secs(60)));
        assert!(!bucket.try_acquire_at(now + Duration::from_secs(60)));
    }
}
