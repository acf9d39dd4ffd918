use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Awaits `fut`, returning its output together with the elapsed wall-clock time.
pub(crate) async fn timed_async<T, Fut>(label: &'static str, fut: Fut) -> (T, Duration)
where
    Fut: Future<Output = T>,
{
    let start = Instant::now();
    let output = fut.await;
    let elapsed = start.elapsed();
    record(label, elapsed);
    (output, elapsed)
}

pub(crate) async fn time_async_block<T, Fut>(label: &'static str, fut: Fut) -> T
where
    Fut: Future<Output = T>,
{
    timed_async(label, fut).await.0
}

#[cfg(feature = "timings")]
fn record(label: &'static str, elapsed: Duration) {
    tracing::info!(target: "timings", %label, elapsed_ms = elapsed.as_secs_f64() * 1e3);
}

#[cfg(not(feature = "timings"))]
fn record(_: &'static str, _: Duration) {}

/// Sleep needed after a tick to hold a fixed cadence; zero once the tick overran.
pub(crate) fn cadence_remainder(target: Duration, elapsed: Duration) -> Duration {
    target.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_remainder() {
        let target = Duration::from_millis(1000);
        assert_eq!(
            cadence_remainder(target, Duration::from_millis(250)),
            Duration::from_millis(750)
        );
        assert_eq!(
            cadence_remainder(target, Duration::from_millis(1500)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_timed_async_returns_output() {
        let (value, elapsed) = timed_async("noop", async { 42 }).await;
        assert_eq!(value, 42);
        assert!(elapsed < Duration::from_secs(1));
    }
}
