//! Fixed-delay convergence polling.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::obs;
use crate::scenario::RedundancyLevel;

/// Attempt budget for one convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Total attempts (values below 1 are treated as 1).
    pub max_attempts: u32,
    /// Fixed delay between attempts (milliseconds).
    pub delay_ms: u64,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            delay_ms: 15_000,
        }
    }
}

impl RetryBudget {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Worst-case time spent sleeping between attempts.
    pub fn worst_case_wait(&self) -> Duration {
        self.delay() * self.attempts().saturating_sub(1)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Text that satisfied the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedText {
    pub text: String,
    /// 1-based attempt on which the match happened.
    pub attempts: u32,
}

/// Fetch until `matcher` accepts the returned text or the budget runs out.
///
/// Fetch errors are treated like non-matching text: logged, then retried.
/// There is no delay after the final attempt, so the total sleep is bounded
/// by [`RetryBudget::worst_case_wait`].
pub async fn poll_until<P, Fut, E, M>(
    target: &str,
    budget: RetryBudget,
    mut fetch: P,
    matcher: M,
) -> Result<MatchedText>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<String, E>>,
    E: Display,
    M: Fn(&str) -> bool,
{
    let max_attempts = budget.attempts();
    let mut last_observation = String::new();

    for attempt in 1..=max_attempts {
        match fetch().await {
            Ok(text) if matcher(&text) => {
                return Ok(MatchedText {
                    text,
                    attempts: attempt,
                });
            }
            Ok(text) => last_observation = text,
            Err(err) => last_observation = format!("error: {err}"),
        }

        obs::emit_poll_attempt(target, attempt, max_attempts, first_line(&last_observation));

        if attempt < max_attempts {
            tokio::time::sleep(budget.delay()).await;
        }
    }

    Err(FleetError::ConvergenceTimeout {
        target: target.to_string(),
        attempts: max_attempts,
        delay_ms: budget.delay_ms,
        last_observation: last_observation.trim().to_string(),
    })
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

/// Matches mdstat text once the array is active at the expected level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayMatcher {
    array: String,
    level: RedundancyLevel,
}

impl ArrayMatcher {
    pub fn new(array: impl Into<String>, level: RedundancyLevel) -> Self {
        Self {
            array: array.into(),
            level,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let header = format!("{} : active", self.array);
        text.lines().any(|line| {
            line.starts_with(&header)
                && line
                    .split_whitespace()
                    .any(|token| token == self.level.kernel_label())
        })
    }
}
