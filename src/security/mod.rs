pub mod complexity;
pub mod rate_limit;
pub mod sanitize;

pub use complexity::ComplexityScorer;
pub use rate_limit::RateLimiter;
pub use sanitize::{sanitize_json, sanitize_str};

use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::SecurityConfig;

/// Bundles the per-request admission checks applied before any message
/// reaches the orchestrator: tenant rate limiting, then complexity scoring.
pub struct SecurityGate {
    limiter: RateLimiter,
    scorer: ComplexityScorer,
}

impl SecurityGate {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            limiter: RateLimiter::new(
                config.rate_limit_requests,
                Duration::from_secs(config.rate_limit_window_secs),
            ),
            scorer: ComplexityScorer::new(config.complexity_threshold),
        }
    }

    pub fn admit(&self, tenant_id: &str, message: &str) -> Result<(), AppError> {
        self.limiter.check(tenant_id)?;
        self.scorer.check(tenant_id, message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SecurityConfig {
        SecurityConfig {
            rate_limit_requests: 2,
            rate_limit_window_secs: 60,
            complexity_threshold: 10,
            request_timeout_secs: 30,
            auto_register_sheets: false,
        }
    }

    #[test]
    fn test_gate_applies_both_checks() {
        let gate = SecurityGate::new(&test_config());
        assert!(gate.admit("t1", "show me 5 orders").is_ok());
        assert!(gate.admit("t1", "drop table users; -- boom /* x */").is_err());
        // Third request exceeds the 2-per-window limit regardless of content
        assert!(matches!(
            gate.admit("t1", "hello"),
            Err(AppError::RateLimited { .. })
        ));
    }
}
