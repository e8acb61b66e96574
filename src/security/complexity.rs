use crate::api::middleware::AppError;

/// Weighted risk signals scanned against the raw inbound message.
const MUTATING_KEYWORDS: &[&str] = &[
    "drop table", "drop database", "truncate", "delete from", "insert into",
    "update ", "alter table", "grant ", "revoke ",
];

const MAX_REASONABLE_LENGTH: usize = 2000;

/// Scores the raw message against risk signals; rejects requests above the
/// threshold and logs (but permits) moderately elevated scores.
pub struct ComplexityScorer {
    threshold: u32,
}

impl ComplexityScorer {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    pub fn score(&self, message: &str) -> u32 {
        let lower = message.to_lowercase();
        let mut score = 0u32;

        for keyword in MUTATING_KEYWORDS {
            if lower.contains(keyword) {
                score += 5;
            }
        }

        // Multiple statements
        if lower.matches(';').count() >= 1 {
            score += 3;
        }

        // Embedded comment markers
        if lower.contains("--") || lower.contains("/*") {
            score += 4;
        }

        if message.len() > MAX_REASONABLE_LENGTH {
            score += 3;
        }

        score
    }

    pub fn check(&self, tenant_id: &str, message: &str) -> Result<(), AppError> {
        let score = self.score(message);
        if score > self.threshold {
            tracing::warn!(
                "Rejecting message for tenant {} with complexity score {}",
                tenant_id,
                score
            );
            return Err(AppError::Validation(format!(
                "Request looks unsafe or overly complex (score {}). Rephrase your question as a read-only query.",
                score
            )));
        }
        if score > self.threshold / 2 {
            tracing::warn!(
                "Elevated complexity score {} for tenant {} (threshold {})",
                score,
                tenant_id,
                self.threshold
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_question_scores_zero() {
        let scorer = ComplexityScorer::new(10);
        assert_eq!(scorer.score("show me 5 orders"), 0);
        assert!(scorer.check("t1", "show me 5 orders").is_ok());
    }

    #[test]
    fn test_mutating_statement_rejected() {
        let scorer = ComplexityScorer::new(10);
        let msg = "drop table users; drop database prod; -- cleanup";
        assert!(scorer.score(msg) > 10);
        assert!(scorer.check("t1", msg).is_err());
    }

    #[test]
    fn test_moderate_score_permitted() {
        let scorer = ComplexityScorer::new(10);
        // Single keyword scores 5: above half the threshold, still admitted
        let msg = "why does update  of orders fail?";
        assert!(scorer.score(msg) <= 10);
        assert!(scorer.check("t1", msg).is_ok());
    }
}
