use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde_json::Value;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CLIENT_USER_AGENT: &str = concat!("f1_predict/", env!("CARGO_PKG_VERSION"));

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug)]
pub enum FetchFailure {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            deadline: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts or
/// crosses the deadline.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: impl FnMut() -> std::result::Result<T, FetchFailure>,
) -> Result<T> {
    let started = Instant::now();
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(FetchFailure::Permanent(err)) => {
                return Err(err.context(format!("{label}: permanent failure")));
            }
            Err(FetchFailure::Transient(err)) => {
                tracing::warn!(%label, attempt, attempts, error = %err, "transient fetch failure");
                last_err = Some(err);
            }
        }
        if attempt == attempts {
            break;
        }
        let delay = policy.delay_for(attempt);
        if started.elapsed() + delay >= policy.deadline {
            let err = last_err.take().unwrap_or_else(|| anyhow!("no attempt made"));
            return Err(err.context(format!(
                "{label}: deadline of {}s exceeded",
                policy.deadline.as_secs()
            )));
        }
        thread::sleep(delay);
    }

    let err = last_err.unwrap_or_else(|| anyhow!("no attempt made"));
    Err(err.context(format!("{label}: gave up after {attempts} attempts")))
}

pub fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> std::result::Result<Value, FetchFailure> {
    let resp = client
        .get(url)
        .query(query)
        .header(USER_AGENT, CLIENT_USER_AGENT)
        .send()
        .map_err(|err| FetchFailure::Transient(anyhow!(err).context("request failed")))?;
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|err| FetchFailure::Transient(anyhow!(err).context("failed reading body")))?;
    if !status.is_success() {
        let err = anyhow!("http {}: {}", status, truncate(&body, 200));
        return Err(classify_status(status, err));
    }
    serde_json::from_str::<Value>(body.trim())
        .map_err(|err| FetchFailure::Permanent(anyhow!(err).context("invalid json body")))
}

fn classify_status(status: StatusCode, err: anyhow::Error) -> FetchFailure {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchFailure::Transient(err)
    } else {
        FetchFailure::Permanent(err)
    }
}

fn truncate(raw: &str, max: usize) -> &str {
    match raw.char_indices().nth(max) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::ZERO,
            deadline: Duration::from_secs(5),
        }
    }

    #[test]
    fn retries_transient_then_succeeds() {
        let calls = Cell::new(0);
        let out = with_retry(&fast_policy(3), "test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchFailure::Transient(anyhow!("flaky")))
            } else {
                Ok(7)
            }
        })
        .expect("third attempt succeeds");
        assert_eq!(out, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_failure_stops_immediately() {
        let calls = Cell::new(0);
        let res: Result<()> = with_retry(&fast_policy(5), "test", || {
            calls.set(calls.get() + 1);
            Err(FetchFailure::Permanent(anyhow!("not found")))
        });
        assert!(res.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let res: Result<()> = with_retry(&fast_policy(2), "laps", || {
            Err(FetchFailure::Transient(anyhow!("timeout")))
        });
        let msg = format!("{:#}", res.unwrap_err());
        assert!(msg.contains("gave up after 2 attempts"));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(100),
            deadline: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, anyhow!("x")),
            FetchFailure::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, anyhow!("x")),
            FetchFailure::Permanent(_)
        ));
    }
}
