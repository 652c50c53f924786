use std::future::Future;
use std::time::Duration;

/// How a raced computation was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome<T> {
    Completed(T),
    /// The deadline passed first; the computation keeps running detached.
    TimedOut(T),
    /// The computation panicked or was aborted before the deadline.
    Failed(T),
}

impl<T> RaceOutcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Completed(value) | Self::TimedOut(value) | Self::Failed(value) => value,
        }
    }

    pub const fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// Races `compute` against `timeout`.
///
/// `compute` runs as its own task, so losing the race does not cancel it: it
/// keeps running to completion and any side effects it has (cache population)
/// still land. A panic after the deadline is swallowed by the runtime.
pub async fn race<T, F>(compute: F, timeout: Duration, fallback: T) -> RaceOutcome<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(compute);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(value)) => RaceOutcome::Completed(value),
        Ok(Err(err)) => {
            log::warn!("Raced computation failed: {err}");
            RaceOutcome::Failed(fallback)
        }
        Err(_) => {
            log::debug!(
                "Race deadline of {}ms elapsed, continuing in background",
                timeout.as_millis()
            );
            RaceOutcome::TimedOut(fallback)
        }
    }
}

/// [`race`] without the outcome tag.
pub async fn race_with_fallback<T, F>(compute: F, timeout: Duration, fallback: T) -> T
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    race(compute, timeout, fallback).await.into_inner()
}
