//! Ordered fallback: try each strategy in turn and stop at the first one that
//! produces a value.
//!
//! Scope detection and agent invocation both use this. An attempt returns
//! `Ok(Some(value))` on success, `Ok(None)` when it ran but found nothing, and
//! `Err(_)` when it failed. Later strategies are never attempted once one
//! succeeds.

use std::fmt;
use std::future::Future;

use tracing::debug;

use crate::error::Result;

/// Anything that can be tried as one step of a fallback chain.
pub trait Strategy {
    fn name(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub strategy: String,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => write!(f, "{}: succeeded", self.strategy),
            AttemptOutcome::Empty => write!(f, "{}: empty", self.strategy),
            AttemptOutcome::Failed(reason) => write!(f, "{}: failed: {reason}", self.strategy),
        }
    }
}

/// Result of running a chain: the winning strategy and value (if any) plus the
/// trail of every attempt made.
#[derive(Debug)]
pub struct Resolution<T> {
    pub winner: Option<(String, T)>,
    pub attempts: Vec<AttemptRecord>,
}

impl<T> Resolution<T> {
    pub fn is_exhausted(&self) -> bool {
        self.winner.is_none()
    }

    fn record(&mut self, strategy: String, result: Result<Option<T>>) -> bool {
        let outcome = match result {
            Ok(Some(value)) => {
                self.winner = Some((strategy.clone(), value));
                AttemptOutcome::Succeeded
            }
            Ok(None) => AttemptOutcome::Empty,
            Err(e) => AttemptOutcome::Failed(e.to_string()),
        };
        let done = outcome == AttemptOutcome::Succeeded;
        let record = AttemptRecord { strategy, outcome };
        debug!(attempt = %record, "fallback attempt");
        self.attempts.push(record);
        done
    }
}

impl<T> Default for Resolution<T> {
    fn default() -> Self {
        Self {
            winner: None,
            attempts: Vec::new(),
        }
    }
}

/// Synchronous chain.
pub fn first_success<'a, S, T, F>(strategies: &'a [S], mut attempt: F) -> Resolution<T>
where
    S: Strategy,
    F: FnMut(&'a S) -> Result<Option<T>>,
{
    let mut resolution = Resolution::default();
    for strategy in strategies {
        if resolution.record(strategy.name(), attempt(strategy)) {
            break;
        }
    }
    resolution
}

/// Asynchronous chain. Attempts still run one at a time, in order.
pub async fn first_success_async<'a, S, T, F, Fut>(
    strategies: &'a [S],
    mut attempt: F,
) -> Resolution<T>
where
    S: Strategy,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut resolution = Resolution::default();
    for strategy in strategies {
        let result = attempt(strategy).await;
        if resolution.record(strategy.name(), result) {
            break;
        }
    }
    resolution
}
