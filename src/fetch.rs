//! Retrying HTTP fetch with exponential backoff.
//!
//! Wraps a single logical GET-for-JSON call in a retry loop:
//! - 2xx with a parseable JSON body → success.
//! - 2xx with an unparseable body → failure, eligible for retry (bodies can
//!   be transiently malformed under load).
//! - 429 or 5xx → retry until the attempt ceiling.
//! - Network-level errors → retry, same as a retryable status.
//! - Any other 4xx → fail immediately.
//!
//! The delay before a retry honors a `Retry-After` header (integer seconds
//! or HTTP-date) when present; otherwise it is
//! `min(base · 2^retry_index, cap) + uniform jitter`.
//!
//! Exhaustion never panics and never returns `Err` by itself: the caller
//! gets a [`FetchOutcome::Failed`] carrying the last status, a short body
//! preview, and a retry/duration summary. Startup-critical callers opt into
//! an error with [`FetchOutcome::into_result`].
//!
//! The HTTP transport and the sleep function are injected traits so tests
//! can drive the whole state machine without a network or real delays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

const BODY_PREVIEW_LEN: usize = 160;

/// Retry/backoff parameters for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the random jitter added to exponential delays.
    pub jitter: Duration,
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Whether an HTTP status is worth retrying: 429 or any 5xx.
    pub fn is_retryable(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Exponential delay before the retry with the given zero-based index,
    /// capped, before jitter.
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << retry_index.min(16));
        exp.min(self.max_backoff)
    }

    /// Full delay for a retry: a parseable `Retry-After` value takes
    /// precedence over the exponential schedule; otherwise exponential
    /// plus jitter.
    fn delay(&self, retry_index: u32, retry_after: Option<&str>, now: DateTime<Utc>) -> Duration {
        if self.honor_retry_after {
            if let Some(value) = retry_after.and_then(|v| parse_retry_after(v, now)) {
                return value;
            }
        }
        let mut delay = self.base_delay(retry_index);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        }
        delay
    }
}

/// Parse a `Retry-After` header value: either a delay in whole seconds or
/// an HTTP-date. Dates in the past clamp to zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Summary of how a logical request went.
#[derive(Debug, Clone, Copy)]
pub struct FetchMeta {
    /// Retries performed (0 = succeeded/failed on the first attempt).
    pub retries: u32,
    pub duration: Duration,
}

/// Terminal state of a logical request.
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        body: serde_json::Value,
        meta: FetchMeta,
    },
    Failed {
        /// Last HTTP status seen, `None` when the failure was network-level.
        status: Option<u16>,
        body_preview: Option<String>,
        meta: FetchMeta,
    },
}

impl FetchOutcome {
    /// The payload, if the request succeeded.
    pub fn success(self) -> Option<serde_json::Value> {
        match self {
            FetchOutcome::Success { body, .. } => Some(body),
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchOutcome::Success { .. } => None,
            FetchOutcome::Failed { status, .. } => *status,
        }
    }

    /// Opt into an error on exhaustion, for calls the process cannot run
    /// without (e.g. the metadata API configuration document).
    pub fn into_result(self, what: &str) -> Result<serde_json::Value> {
        match self {
            FetchOutcome::Success { body, .. } => Ok(body),
            FetchOutcome::Failed {
                status,
                body_preview,
                meta,
            } => {
                let status_desc = status
                    .map(|s| format!("HTTP {}", s))
                    .unwrap_or_else(|| "network error".to_string());
                anyhow::bail!(
                    "{} failed after {} retries ({}): {}",
                    what,
                    meta.retries,
                    status_desc,
                    body_preview.unwrap_or_default()
                )
            }
        }
    }
}

/// A raw HTTP response as the retry loop sees it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

/// One HTTP GET. An `Err` is a network-level failure (connect, timeout);
/// protocol-level failures come back as an [`HttpResponse`] status.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse>;
}

/// Injected sleep so tests can observe delays instead of waiting them out.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production transport over a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url).header("accept", "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.text().await.unwrap_or_default();
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Production sleeper.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Drives one logical GET-for-JSON request through the retry state machine.
pub struct RetryingFetcher {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    /// Fetch `url` and parse the body as JSON, retrying per the policy.
    pub async fn fetch_json(&self, url: &str, bearer: Option<&str>) -> FetchOutcome {
        let start = Instant::now();
        let mut last_status: Option<u16> = None;
        let mut body_preview: Option<String> = None;

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;
            let meta = |retries: u32| FetchMeta {
                retries,
                duration: start.elapsed(),
            };

            match self.transport.get(url, bearer).await {
                Ok(response) => {
                    last_status = Some(response.status);
                    if (200..300).contains(&response.status) {
                        match serde_json::from_str(&response.body) {
                            Ok(body) => {
                                return FetchOutcome::Success {
                                    body,
                                    meta: meta(attempt),
                                }
                            }
                            // Malformed body under load; retry the call.
                            Err(_) => {
                                body_preview = Some(preview(&response.body));
                                if is_last {
                                    return FetchOutcome::Failed {
                                        status: last_status,
                                        body_preview,
                                        meta: meta(attempt),
                                    };
                                }
                                self.sleep_before_retry(attempt, None).await;
                                continue;
                            }
                        }
                    }

                    body_preview = Some(preview(&response.body));
                    if RetryPolicy::is_retryable(response.status) && !is_last {
                        self.sleep_before_retry(attempt, response.retry_after.as_deref())
                            .await;
                        continue;
                    }
                    return FetchOutcome::Failed {
                        status: last_status,
                        body_preview,
                        meta: meta(attempt),
                    };
                }
                Err(_) => {
                    if is_last {
                        return FetchOutcome::Failed {
                            status: last_status,
                            body_preview,
                            meta: meta(attempt),
                        };
                    }
                    self.sleep_before_retry(attempt, None).await;
                }
            }
        }

        // max_attempts >= 1, so every path above returns first.
        FetchOutcome::Failed {
            status: last_status,
            body_preview,
            meta: FetchMeta {
                retries: max_attempts - 1,
                duration: start.elapsed(),
            },
        }
    }

    async fn sleep_before_retry(&self, retry_index: u32, retry_after: Option<&str>) {
        let delay = self.policy.delay(retry_index, retry_after, Utc::now());
        self.sleeper.sleep(delay).await;
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_LEN).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport and recording sleeper shared by fetcher and
    //! enricher tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of responses, recording every request.
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse>>>,
        pub requests: Mutex<Vec<String>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Result<HttpResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str, _bearer: Option<&str>) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(anyhow::anyhow!("scripted transport ran out of responses"))
                })
        }
    }

    /// Records requested delays without sleeping.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    pub fn ok_json(body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            retry_after: None,
            body: body.to_string(),
        })
    }

    pub fn status(code: u16) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: code,
            retry_after: None,
            body: String::new(),
        })
    }

    pub fn status_with_retry_after(code: u16, retry_after: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: code,
            retry_after: Some(retry_after.to_string()),
            body: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use chrono::TimeZone;

    fn no_jitter_policy() -> RetryPolicy {
        RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    fn fetcher(
        transport: Arc<ScriptedTransport>,
        sleeper: Arc<RecordingSleeper>,
        policy: RetryPolicy,
    ) -> RetryingFetcher {
        RetryingFetcher::new(transport, sleeper, policy)
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            ..RetryPolicy::default()
        };
        let delays: Vec<_> = (0..5).map(|i| policy.base_delay(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
            ]
        );
        for window in delays.windows(2) {
            assert!(window[0] <= window[1]);
        }
        // Beyond the cap it stays flat.
        assert_eq!(policy.base_delay(10), Duration::from_secs(8));
    }

    #[test]
    fn retry_after_parses_seconds_and_http_date() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("2", now),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            parse_retry_after("Sun, 01 Jun 2025 12:00:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        // Past dates clamp to zero.
        assert_eq!(
            parse_retry_after("Sun, 01 Jun 2025 11:59:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn retry_after_takes_precedence_over_schedule() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status_with_retry_after(429, "2"),
            ok_json(r#"{"ok":true}"#),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport.clone(), sleeper.clone(), no_jitter_policy())
            .fetch_json("https://api.test/thing", None)
            .await;

        assert!(matches!(outcome, FetchOutcome::Success { .. }));
        let slept = sleeper.slept.lock().unwrap().clone();
        assert_eq!(slept.len(), 1);
        // The exponential schedule would have waited only 500ms here.
        assert!(slept[0] >= Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn retries_429_until_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(429),
            status(429),
            ok_json(r#"{"poster_path":"/x.jpg"}"#),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport.clone(), sleeper.clone(), no_jitter_policy())
            .fetch_json("https://api.test/movie/42", None)
            .await;

        match outcome {
            FetchOutcome::Success { body, meta } => {
                assert_eq!(body["poster_path"], "/x.jpg");
                assert_eq!(meta.retries, 2);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(transport.call_count(), 3);
        // 500ms, then 1000ms.
        let slept = sleeper.slept.lock().unwrap().clone();
        assert_eq!(
            slept,
            vec![Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn non_retryable_4xx_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(404)]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport.clone(), sleeper.clone(), no_jitter_policy())
            .fetch_json("https://api.test/person/99", None)
            .await;

        match outcome {
            FetchOutcome::Failed { status, meta, .. } => {
                assert_eq!(status, Some(404));
                assert_eq!(meta.retries, 0);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(transport.call_count(), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_success_body_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            ok_json("<html>not json</html>"),
            ok_json(r#"{"ok":true}"#),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport.clone(), sleeper, no_jitter_policy())
            .fetch_json("https://api.test/configuration", None)
            .await;
        assert!(matches!(outcome, FetchOutcome::Success { .. }));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn network_errors_exhaust_to_statusless_failure() {
        let responses = (0..5)
            .map(|_| Err(anyhow::anyhow!("connection reset")))
            .collect();
        let transport = Arc::new(ScriptedTransport::new(responses));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport.clone(), sleeper.clone(), no_jitter_policy())
            .fetch_json("https://api.test/movie/1", None)
            .await;

        match outcome {
            FetchOutcome::Failed { status, meta, .. } => {
                assert_eq!(status, None);
                assert_eq!(meta.retries, 4);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(transport.call_count(), 5);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn into_result_surfaces_exhaustion() {
        let transport = Arc::new(ScriptedTransport::new((0..5).map(|_| status(500)).collect()));
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(transport, sleeper, no_jitter_policy())
            .fetch_json("https://api.test/configuration", None)
            .await;
        let err = outcome.into_result("configuration fetch").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("configuration fetch"));
        assert!(message.contains("HTTP 500"));
    }
}
