use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window request counter per tenant. Exceeding the configured count
/// within a window yields RateLimited with seconds-until-reset.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn check(&self, tenant_id: &str) -> Result<(), AppError> {
        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();

        let window = windows.entry(tenant_id.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count >= self.max_requests {
            let retry_after_secs = window
                .reset_at
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            tracing::warn!(
                "Rate limit exceeded for tenant {} ({} requests in window)",
                tenant_id,
                window.count
            );
            return Err(AppError::RateLimited { retry_after_secs });
        }

        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_with_retry_after() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("t1").is_ok());
        }
        match limiter.check("t1") {
            Err(AppError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected RateLimited, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_tenants_have_independent_windows() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("t1").is_ok());
        assert!(limiter.check("t2").is_ok());
        assert!(limiter.check("t1").is_err());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.check("t1").is_ok());
        assert!(limiter.check("t1").is_err());
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check("t1").is_ok());
    }
}
