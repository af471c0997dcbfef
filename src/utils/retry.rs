use tokio::time::{sleep, Duration};

/// Runs `f` up to `attempts` times, sleeping `delay * n` after the n-th failure
///
/// Stops early on an error `should_retry` rejects. Returns the first success
/// or the last error.
pub async fn with_retry<F, Fut, T, E, P>(
    f: F,
    attempts: u32,
    delay: Duration,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = attempts.max(1);
    let mut failures = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                failures += 1;
                if failures >= attempts || !should_retry(&e) {
                    return Err(e);
                }
                sleep(delay * failures).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err("not yet") } else { Ok(n) }
            },
            5,
            Duration::from_millis(1),
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down")
            },
            2,
            Duration::from_millis(1),
            |_| true,
        )
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_on_rejected_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request")
            },
            5,
            Duration::from_millis(1),
            |e| *e != "bad request",
        )
        .await;

        assert_eq!(result, Err("bad request"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
