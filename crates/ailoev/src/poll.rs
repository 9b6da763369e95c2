use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

#[derive(Debug, thiserror::Error)]
#[error("Timed out after {waited:?} waiting for {what}")]
pub struct Timeout {
    pub what: String,
    pub waited: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOptions {
    #[serde(with = "millis")]
    pub interval: Duration,
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Runs `check` every `interval` until it yields a value, fails, or
/// `timeout` elapses. The first check happens immediately.
pub async fn poll_until<T, E, F, Fut>(what: &str, options: &PollOptions, mut check: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: From<Timeout>,
{
    let started = Instant::now();
    loop {
        if let Some(value) = check().await? {
            log::debug!("{} after {:?}", what, started.elapsed());
            return Ok(value);
        }

        let waited = started.elapsed();
        if waited >= options.timeout {
            log::warn!("Gave up waiting for {} after {:?}", what, waited);
            return Err(Timeout {
                what: what.to_string(),
                waited,
            }
            .into());
        }

        sleep(options.interval.min(options.timeout - waited)).await;
    }
}

/// Boolean flavour of [`poll_until`].
pub async fn wait_for<E, F, Fut>(what: &str, options: &PollOptions, mut condition: F) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: From<Timeout>,
{
    poll_until(what, options, || {
        let fut = condition();
        async move { Ok::<_, E>(fut.await?.then_some(())) }
    })
    .await
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    enum TestError {
        Timeout(Timeout),
        Check,
    }

    impl From<Timeout> for TestError {
        fn from(t: Timeout) -> Self {
            TestError::Timeout(t)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_first_value() {
        let calls = Cell::new(0);
        let options = PollOptions::default();

        let value: Result<u32, TestError> = poll_until("third call", &options, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok((n == 3).then_some(n)) }
        })
        .await;

        assert_eq!(value.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let options = PollOptions::new(Duration::from_secs(1), Duration::from_secs(30));
        let started = Instant::now();

        let result: Result<(), TestError> =
            wait_for("never", &options, || async { Ok(false) }).await;

        match result {
            Err(TestError::Timeout(t)) => {
                assert_eq!(t.what, "never");
                assert!(t.waited >= Duration::from_secs(30));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_propagates_check_error() {
        let options = PollOptions::default();
        let result: Result<(), TestError> =
            wait_for("failing", &options, || async { Err(TestError::Check) }).await;
        assert!(matches!(result, Err(TestError::Check)));
    }

    #[test]
    fn test_poll_options_serde_millis() {
        let options: PollOptions =
            serde_json::from_str(r#"{"interval": 250, "timeout": 5000}"#).unwrap();
        assert_eq!(options.interval, Duration::from_millis(250));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
