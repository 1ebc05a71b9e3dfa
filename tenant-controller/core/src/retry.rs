use std::future::Future;
use tokio::time::{self, Duration};

/// Errors that signal a stale resource version on write.
pub trait ConflictError {
    fn is_conflict(&self) -> bool;
}

/// Exponential backoff parameters for optimistic-concurrency retries.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Total number of attempts.
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    /// Fraction of the current delay added at random.
    pub jitter: f64,
}

impl Default for Backoff {
    /// Four attempts starting at 10ms, growing by 5x with 10% jitter.
    fn default() -> Self {
        Self {
            steps: 4,
            duration: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }
}

/// Runs `f` until it returns something other than a conflict, or the backoff
/// is exhausted. `f` is expected to re-read the object it writes.
pub async fn retry_on_conflict<T, E, F, Fut>(backoff: Backoff, mut f: F) -> Result<T, E>
where
    E: ConflictError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = backoff.duration;
    let mut attempt = 1;
    loop {
        match f().await {
            Err(error) if error.is_conflict() && attempt < backoff.steps => {
                let wait = delay.mul_f64(1.0 + rand::random::<f64>() * backoff.jitter);
                tracing::debug!(attempt, ?wait, "Conflict; retrying");
                time::sleep(wait).await;
                delay = delay.mul_f64(backoff.factor);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Conflict,
        Fatal,
    }

    impl ConflictError for TestError {
        fn is_conflict(&self) -> bool {
            matches!(self, Self::Conflict)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_conflicts_until_success() {
        let mut attempts = 0;
        let result = retry_on_conflict(Backoff::default(), || {
            attempts += 1;
            let n = attempts;
            async move {
                if n < 3 {
                    Err(TestError::Conflict)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_steps() {
        let mut attempts = 0;
        let start = time::Instant::now();
        let result: Result<(), _> = retry_on_conflict(Backoff::default(), || {
            attempts += 1;
            async { Err(TestError::Conflict) }
        })
        .await;
        assert_eq!(result, Err(TestError::Conflict));
        assert_eq!(attempts, 4);
        // 10ms + 50ms + 250ms, each with up to 10% jitter.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(310), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(342), "{elapsed:?}");
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut attempts = 0;
        let result: Result<(), _> = retry_on_conflict(Backoff::default(), || {
            attempts += 1;
            async { Err(TestError::Fatal) }
        })
        .await;
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(attempts, 1);
    }
}
