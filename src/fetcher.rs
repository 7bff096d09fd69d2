use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::config::{Config, RetryPolicy, API_KEY_HEADER, HTTP_POOL_MAX_IDLE, USER_AGENT};
use crate::error::{AppError, Result};
use crate::latency::LatencyStats;

/// Paired `limit:window` headers, checked in order when a 429 carries no `Retry-After`.
const RATE_LIMIT_HEADERS: &[(&str, &str)] = &[
    ("x-app-rate-limit", "x-app-rate-limit-count"),
    ("x-method-rate-limit", "x-method-rate-limit-count"),
];

/// Capability to GET a URL and hand back the response body.
///
/// `None` means the request is abandoned: retries are exhausted or the failure is not
/// retryable. Callers treat it as a skippable failure.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Option<String>;

    /// Called after each collection stage.
    fn stage_finished(&self, _stage: &str) {}
}

/// Backoff families. The multiplier scales `RetryPolicy::backoff_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// 5xx, connection, protocol and body-read failures.
    Transient,
    /// The attempt ran past its timeout.
    Timeout,
    /// Anything the client reports that fits neither bucket.
    Unexpected,
}

impl BackoffKind {
    fn multiplier(self) -> u32 {
        match self {
            BackoffKind::Transient => 1,
            BackoffKind::Timeout => 2,
            BackoffKind::Unexpected => 3,
        }
    }

    fn classify(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            BackoffKind::Timeout
        } else if e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
            BackoffKind::Transient
        } else {
            BackoffKind::Unexpected
        }
    }
}

/// HTTP GET with bounded attempts, server-directed rate-limit waits and exponential backoff.
/// One pooled client is reused for every request.
pub struct RateLimitedFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    latency: LatencyStats,
}

impl RateLimitedFetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut token = HeaderValue::from_str(&cfg.api_key).map_err(|_| {
            AppError::Config("RIOT_API_KEY contains characters not allowed in a header".to_string())
        })?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), token);

        // No timeout on the builder: each attempt sets its own.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            retry: cfg.retry.clone(),
            latency: LatencyStats::new(),
        })
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    fn backoff(&self, attempt: u32, kind: BackoffKind) -> Duration {
        let base = self.retry.backoff_base.saturating_mul(kind.multiplier());
        with_jitter(backoff_delay(attempt, base, self.retry.max_backoff))
    }
}

impl Fetch for RateLimitedFetcher {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Option<String> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let is_last = attempt + 1 == max_attempts;
            let tries = format!("attempt {}/{max_attempts}", attempt + 1);
            let timeout = attempt_timeout(self.retry.base_timeout, attempt);
            let started = Instant::now();

            let result = self
                .client
                .get(url)
                .query(query)
                .timeout(timeout)
                .send()
                .await;

            let wait = match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = rate_limit_wait(resp.headers());
                        warn!("[429] Rate limited. Sleeping {}s ({tries})", wait.as_secs());
                        wait
                    } else if status.is_server_error() {
                        let wait = self.backoff(attempt, BackoffKind::Transient);
                        warn!(
                            "[{}] Server error for URL: {url}. Retrying in {:.2}s ({tries})",
                            status.as_u16(),
                            wait.as_secs_f64(),
                        );
                        wait
                    } else if !status.is_success() {
                        error!("HTTP error {} for URL: {url}", status.as_u16());
                        return None;
                    } else {
                        match resp.text().await {
                            Ok(body) => {
                                self.latency.record(started.elapsed());
                                let elapsed_ms = started.elapsed().as_millis() as u64;
                                debug!(url, elapsed_ms, "fetched");
                                return Some(body);
                            }
                            Err(e) => {
                                let kind = BackoffKind::classify(&e);
                                let wait = self.backoff(attempt, kind);
                                warn!(
                                    "Body read failed ({kind:?}: {e}) for URL: {url}. \
                                     Retrying in {:.2}s ({tries})",
                                    wait.as_secs_f64(),
                                );
                                wait
                            }
                        }
                    }
                }
                Err(e) => {
                    let kind = BackoffKind::classify(&e);
                    if kind == BackoffKind::Unexpected {
                        error!("Unexpected error ({e}) for URL: {url}");
                        if is_last {
                            return None;
                        }
                    }
                    let wait = self.backoff(attempt, kind);
                    warn!(
                        "{kind:?} error ({e}) for URL: {url}. Retrying in {:.2}s ({tries})",
                        wait.as_secs_f64(),
                    );
                    wait
                }
            };

            if !is_last {
                tokio::time::sleep(wait).await;
            }
        }

        error!("Max retries exceeded for URL: {url}");
        None
    }

    fn stage_finished(&self, stage: &str) {
        self.latency.log_summary(stage);
        self.latency.reset();
    }
}

/// `base × (1 + 0.5 × attempt)`: later attempts tolerate a slower server.
pub fn attempt_timeout(base: Duration, attempt: u32) -> Duration {
    base.mul_f64(1.0 + 0.5 * f64::from(attempt))
}

/// `min(max, base × 2^attempt)`, without jitter.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Adds up to 10% on top of `delay`.
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter: f64 = rand::rng().random_range(0.0..0.1);
    delay + delay.mul_f64(jitter)
}

/// Parse a `limit:window,limit:window` header. Malformed chunks are skipped.
pub fn parse_header_pairs(value: &str) -> Vec<(u64, u64)> {
    value
        .split(',')
        .filter_map(|chunk| {
            let (limit, window) = chunk.trim().split_once(':')?;
            Some((limit.trim().parse().ok()?, window.trim().parse().ok()?))
        })
        .collect()
}

/// Largest window among pairs whose count has reached its limit. Limits and counts are matched
/// on their window, so a malformed chunk in either header cannot shift the pairing.
pub fn violated_window(limits: &str, counts: &str) -> Option<u64> {
    let counts = parse_header_pairs(counts);
    parse_header_pairs(limits)
        .into_iter()
        .filter(|&(limit, window)| {
            counts.iter().any(|&(count, w)| w == window && count >= limit)
        })
        .map(|(_, window)| window)
        .max()
}

/// How long to sleep after a 429. `Retry-After` wins; otherwise the widest violated window;
/// otherwise one second.
pub fn rate_limit_wait(headers: &HeaderMap) -> Duration {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");

    if let Some(secs) = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs);
    }

    let window = RATE_LIMIT_HEADERS
        .iter()
        .filter_map(|(limit, count)| violated_window(header(limit), header(count)))
        .max()
        .unwrap_or(1);
    Duration::from_secs(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;

    type Hits = Arc<AtomicUsize>;

    fn test_config(max_attempts: u32) -> Config {
        Config {
            api_key: "RGAPI-test".to_string(),
            retry: RetryPolicy {
                max_attempts,
                base_timeout: Duration::from_secs(2),
                backoff_base: Duration::from_millis(1),
                max_backoff: Duration::from_millis(20),
            },
            ..Config::default()
        }
    }

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn rate_limited_once(State(hits): State<Hits>) -> Response {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "0")], "slow down").into_response()
        } else {
            (StatusCode::OK, r#"["p1"]"#).into_response()
        }
    }

    async fn unavailable_twice(State(hits): State<Hits>) -> Response {
        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        } else {
            (StatusCode::OK, "{}").into_response()
        }
    }

    async fn always_failing(State(hits): State<Hits>) -> StatusCode {
        hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::INTERNAL_SERVER_ERROR
    }

    async fn not_found(State(hits): State<Hits>) -> StatusCode {
        hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::NOT_FOUND
    }

    async fn slow_once(State(hits): State<Hits>) -> &'static str {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        "on time"
    }

    async fn echo(
        headers: axum::http::HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> String {
        let token = headers
            .get("x-riot-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("missing");
        let count = params.get("count").cloned().unwrap_or_default();
        format!("{token}|{count}")
    }

    fn mock_api(hits: Hits) -> Router {
        Router::new()
            .route("/rate-limited", get(rate_limited_once))
            .route("/unavailable", get(unavailable_twice))
            .route("/broken", get(always_failing))
            .route("/missing", get(not_found))
            .route("/slow", get(slow_once))
            .route("/echo", get(echo))
            .with_state(hits)
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let hits = Hits::default();
        let base = spawn_server(mock_api(hits.clone())).await;
        let fetcher = RateLimitedFetcher::new(&test_config(5)).unwrap();

        let body = fetcher.get(&format!("{base}/rate-limited"), &[]).await;

        assert_eq!(body.as_deref(), Some(r#"["p1"]"#));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.latency().len(), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_with_backoff() {
        let hits = Hits::default();
        let base = spawn_server(mock_api(hits.clone())).await;
        let fetcher = RateLimitedFetcher::new(&test_config(5)).unwrap();

        let body = fetcher.get(&format!("{base}/unavailable"), &[]).await;

        assert_eq!(body.as_deref(), Some("{}"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let hits = Hits::default();
        let base = spawn_server(mock_api(hits.clone())).await;
        let fetcher = RateLimitedFetcher::new(&test_config(3)).unwrap();

        assert!(fetcher.get(&format!("{base}/broken"), &[]).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Hits::default();
        let base = spawn_server(mock_api(hits.clone())).await;
        let fetcher = RateLimitedFetcher::new(&test_config(5)).unwrap();

        assert!(fetcher.get(&format!("{base}/missing"), &[]).await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sends_api_key_and_query_parameters() {
        let base = spawn_server(mock_api(Hits::default())).await;
        let fetcher = RateLimitedFetcher::new(&test_config(1)).unwrap();

        let body = fetcher
            .get(&format!("{base}/echo"), &[("count", "20".to_string())])
            .await;

        assert_eq!(body.as_deref(), Some("RGAPI-test|20"));
    }

    #[tokio::test]
    async fn connection_refused_returns_none() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = RateLimitedFetcher::new(&test_config(2)).unwrap();

        assert!(fetcher.get(&format!("http://{addr}/ids"), &[]).await.is_none());
        assert!(fetcher.latency().is_empty());
    }

    #[tokio::test]
    async fn timed_out_attempt_is_retried() {
        let hits = Hits::default();
        let base = spawn_server(mock_api(hits.clone())).await;
        let cfg = test_config(3);
        let cfg = Config {
            retry: RetryPolicy { base_timeout: Duration::from_millis(200), ..cfg.retry.clone() },
            ..cfg
        };
        let fetcher = RateLimitedFetcher::new(&cfg).unwrap();

        let body = fetcher.get(&format!("{base}/slow"), &[]).await;

        assert_eq!(body.as_deref(), Some("on time"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unexpected_error_on_last_attempt_returns_without_sleeping() {
        let cfg = test_config(1);
        let cfg = Config {
            retry: RetryPolicy {
                backoff_base: Duration::from_secs(30),
                max_backoff: Duration::from_secs(60),
                ..cfg.retry.clone()
            },
            ..cfg
        };
        let fetcher = RateLimitedFetcher::new(&cfg).unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), fetcher.get("not a url", &[]))
            .await
            .expect("no backoff after the final attempt");

        assert!(body.is_none());
    }

    #[tokio::test]
    async fn classifies_client_errors() {
        let client = reqwest::Client::new();
        let invalid = client.get("not a url").send().await.unwrap_err();
        assert_eq!(BackoffKind::classify(&invalid), BackoffKind::Unexpected);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let refused = client.get(format!("http://{addr}/")).send().await.unwrap_err();
        assert_eq!(BackoffKind::classify(&refused), BackoffKind::Transient);

        assert_eq!(BackoffKind::Timeout.multiplier(), 2);
        assert_eq!(BackoffKind::Unexpected.multiplier(), 3);
    }

    #[test]
    fn rejects_api_key_with_newline() {
        let cfg = Config { api_key: "bad\nkey".to_string(), ..Config::default() };
        assert!(matches!(RateLimitedFetcher::new(&cfg), Err(AppError::Config(_))));
    }

    #[test]
    fn backoff_is_capped_and_increasing() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = backoff_delay(attempt, base, max);
            assert!(delay <= max, "attempt {attempt}: {delay:?}");
            if delay < max {
                assert!(delay > previous, "attempt {attempt}: {delay:?} <= {previous:?}");
            }
            previous = delay;
        }
        assert_eq!(backoff_delay(0, base, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(8));
        assert_eq!(backoff_delay(6, base, max), max);
    }

    #[test]
    fn jitter_adds_at_most_ten_percent() {
        let delay = Duration::from_secs(10);
        for _ in 0..100 {
            let jittered = with_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_secs(11));
        }
    }

    #[test]
    fn attempt_timeout_grows_by_half_the_base() {
        let base = Duration::from_secs(10);
        assert_eq!(attempt_timeout(base, 0), Duration::from_secs(10));
        assert_eq!(attempt_timeout(base, 1), Duration::from_secs(15));
        assert_eq!(attempt_timeout(base, 4), Duration::from_secs(30));
    }

    #[test]
    fn parses_header_pairs_and_skips_garbage() {
        assert_eq!(parse_header_pairs("20:1,100:120"), vec![(20, 1), (100, 120)]);
        assert_eq!(parse_header_pairs("20:1, oops ,100:120"), vec![(20, 1), (100, 120)]);
        assert!(parse_header_pairs("").is_empty());
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for &(name, value) in pairs {
            map.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn retry_after_takes_precedence() {
        let map = headers(&[
            ("retry-after", "7"),
            ("x-app-rate-limit", "20:1,100:120"),
            ("x-app-rate-limit-count", "20:1,100:120"),
        ]);
        assert_eq!(rate_limit_wait(&map), Duration::from_secs(7));
    }

    #[test]
    fn waits_for_widest_violated_window() {
        let map = headers(&[
            ("x-app-rate-limit", "20:1,100:120"),
            ("x-app-rate-limit-count", "20:1,100:120"),
        ]);
        assert_eq!(rate_limit_wait(&map), Duration::from_secs(120));

        let map = headers(&[
            ("x-app-rate-limit", "20:1,100:120"),
            ("x-app-rate-limit-count", "20:1,57:120"),
        ]);
        assert_eq!(rate_limit_wait(&map), Duration::from_secs(1));

        let map = headers(&[
            ("x-app-rate-limit", "20:1"),
            ("x-app-rate-limit-count", "3:1"),
            ("x-method-rate-limit", "2000:10"),
            ("x-method-rate-limit-count", "2000:10"),
        ]);
        assert_eq!(rate_limit_wait(&map), Duration::from_secs(10));
    }

    #[test]
    fn malformed_chunk_does_not_shift_limit_count_pairing() {
        assert_eq!(violated_window("20:1,100:120", "x:1,100:120"), Some(120));
        assert_eq!(violated_window("20:1,100:120", "20:1,oops"), Some(1));
        assert_eq!(violated_window("20:1,100:120", "100:120,3:1"), Some(120));
        assert_eq!(violated_window("20:1", "19:1"), None);
    }

    #[test]
    fn defaults_to_one_second_without_hints() {
        assert_eq!(rate_limit_wait(&HeaderMap::new()), Duration::from_secs(1));
        let map = headers(&[("retry-after", "soon")]);
        assert_eq!(rate_limit_wait(&map), Duration::from_secs(1));
    }
}
