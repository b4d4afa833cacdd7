//! Concurrency primitives: bounded waves, retry with backoff, cooperative
//! cancellation.
//!
//! Everything here runs on the caller's task. Waves are driven with
//! `join_all`, so OCR calls for one note interleave at their `.await`
//! points without ever being spawned onto other threads. Ordering is
//! therefore simple to reason about: a wave starts, every call in it settles,
//! then the next wave starts.
//!
//! ## Retry strategy
//!
//! Backoff is `base_delay * 2^attempt`. With the 1 s default and 3 retries the
//! wait sequence is 1 s → 2 s → 4 s. Only errors accepted by the retry
//! predicate are retried; everything else propagates on the first failure.
//!
//! ## Cancellation
//!
//! A [`CancellationToken`] is checked at wave boundaries and, for each
//! in-flight call, every `poll_interval` by [`with_cancellation`]. A
//! canceled call resolves to [`Cancellable::Canceled`] and its future is
//! dropped at its current suspension point; an external process it already
//! started is left to exit on its own and its output is never read.

use futures::future::{join_all, try_join_all};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::warn;

/// Shared, clonable cancellation flag.
///
/// Cancellation is advisory: setting the flag never interrupts anything by
/// itself, it is observed at the next check.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of an operation raced against a [`CancellationToken`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cancellable<T> {
    Completed(T),
    Canceled,
}

impl<T> Cancellable<T> {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Cancellable::Canceled)
    }

    /// `Some(value)` if completed, `None` if canceled.
    pub fn completed(self) -> Option<T> {
        match self {
            Cancellable::Completed(v) => Some(v),
            Cancellable::Canceled => None,
        }
    }
}

/// Run zero-argument async tasks in sequential waves of at most `wave_size`.
///
/// Each wave fully settles before the next one starts. No new wave starts
/// once `token` is cancelled; results of the waves that did run are returned
/// in task order.
pub async fn run_in_waves<T, F, Fut>(
    tasks: Vec<F>,
    wave_size: usize,
    token: &CancellationToken,
) -> Vec<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let wave_size = wave_size.max(1);
    let mut results = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter().peekable();

    while pending.peek().is_some() {
        if token.is_cancelled() {
            break;
        }
        let wave: Vec<Fut> = pending.by_ref().take(wave_size).map(|task| task()).collect();
        results.extend(join_all(wave).await);
    }

    results
}

/// Like [`run_in_waves`] for fallible tasks: the first error aborts the
/// current wave immediately (its other futures are dropped) and no further
/// wave starts.
pub async fn try_run_in_waves<T, E, F, Fut>(
    tasks: Vec<F>,
    wave_size: usize,
    token: &CancellationToken,
) -> Result<Vec<T>, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let wave_size = wave_size.max(1);
    let mut results = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter().peekable();

    while pending.peek().is_some() {
        if token.is_cancelled() {
            break;
        }
        let wave: Vec<Fut> = pending.by_ref().take(wave_size).map(|task| task()).collect();
        results.extend(try_join_all(wave).await?);
    }

    Ok(results)
}

/// Invoke `task`, retrying errors accepted by `should_retry` up to
/// `max_retries` additional times with exponential backoff.
///
/// A rejected error, or the last error once retries are exhausted, is
/// returned unchanged.
pub async fn with_retries<T, E, F, Fut, P>(
    mut task: F,
    should_retry: P,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_retries || !should_retry(&e) {
                    return Err(e);
                }
                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Delay before retry number `attempt + 1`.
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

/// Race `operation` against periodic checks of `token`.
///
/// The token is first checked one `poll_interval` after the call, then every
/// `poll_interval`. Resolves to [`Cancellable::Canceled`] as soon as a check
/// sees the token cancelled.
pub async fn with_cancellation<F>(
    operation: F,
    token: &CancellationToken,
    poll_interval: Duration,
) -> Cancellable<F::Output>
where
    F: Future,
{
    tokio::pin!(operation);
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            output = &mut operation => return Cancellable::Completed(output),
            _ = ticker.tick() => {
                if token.is_cancelled() {
                    return Cancellable::Canceled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn waves_never_exceed_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let settled = Arc::new(AtomicUsize::new(0));
        let settled_before_start = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..12u64)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                let settled = Arc::clone(&settled);
                let settled_before_start = Arc::clone(&settled_before_start);
                move || async move {
                    settled_before_start
                        .lock()
                        .unwrap()
                        .push((i, settled.load(Ordering::SeqCst)));
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(100 * (i % 5 + 1))).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    settled.fetch_add(1, Ordering::SeqCst);
                    i
                }
            })
            .collect();

        let results = run_in_waves(tasks, 5, &CancellationToken::new()).await;

        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert_eq!(max_seen.load(Ordering::SeqCst), 5);
        let starts = settled_before_start.lock().unwrap().clone();
        let sixth = starts.iter().find(|(i, _)| *i == 5).unwrap();
        assert!(sixth.1 >= 1, "6th task started before any task settled");
        let eleventh = starts.iter().find(|(i, _)| *i == 10).unwrap();
        assert_eq!(eleventh.1, 10);
    }

    #[tokio::test]
    async fn empty_task_list() {
        let tasks: Vec<fn() -> std::future::Ready<u8>> = Vec::new();
        let results = run_in_waves(tasks, 5, &CancellationToken::new()).await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_new_wave_after_cancel() {
        let token = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..7)
            .map(|i| {
                let token = token.clone();
                let started = Arc::clone(&started);
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    if i == 0 {
                        token.cancel();
                    }
                    i
                }
            })
            .collect();

        let results = run_in_waves(tasks, 3, &token).await;
        assert_eq!(results, vec![0, 1, 2]);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn try_waves_stop_at_first_error() {
        let started = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let started = Arc::clone(&started);
                move || async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(format!("task {i} failed"))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let result = try_run_in_waves(tasks, 2, &CancellationToken::new()).await;
        assert_eq!(result.unwrap_err(), "task 1 failed");
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_exponential_backoff() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let result: Result<&str, String> = with_retries(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    let mut a = attempts.lock().unwrap();
                    a.push(start.elapsed());
                    if a.len() <= 3 {
                        Err("HTTP 503".to_string())
                    } else {
                        Ok("text")
                    }
                }
            },
            |_| true,
            3,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result, Ok("text"));
        let a = attempts.lock().unwrap();
        let gaps: Vec<Duration> = a.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), String> = with_retries(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("HTTP 401".to_string())
                }
            },
            |e| !e.contains("401"),
            3,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result.unwrap_err(), "HTTP 401");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), String> = with_retries(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            },
            |_| true,
            3,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result.unwrap_err(), "failure 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn backoff_sequence() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_resolves_at_next_poll() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = with_cancellation(
            async {
                sleep(Duration::from_secs(60)).await;
                "done"
            },
            &token,
            Duration::from_secs(1),
        )
        .await;

        assert!(result.is_canceled());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_operation_passes_through() {
        let token = CancellationToken::new();
        let result = with_cancellation(
            async {
                sleep(Duration::from_millis(1500)).await;
                42
            },
            &token,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Cancellable::Completed(42));
        assert_eq!(result.completed(), Some(42));
    }
}
