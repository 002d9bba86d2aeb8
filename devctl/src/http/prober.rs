use crate::error::{DevctlError, DevctlResult};
use crate::http::traits::StatusSource;
use common::{ProbeResult, ProbeTarget, Scheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

/// Stand-in for deadlines too far away to represent
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, saturating at a far-future instant instead of overflowing
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Bounded readiness poller
///
/// Polls a target URL on a fixed interval until a response status matches the
/// target's policy or the deadline passes:
/// - connection errors and slow attempts count as non-matching attempts
/// - one attempt is in flight at a time, no backoff
/// - the deadline is wall-clock time, so a slow endpoint cannot stretch the run
pub struct ReadinessProber<T: StatusSource + ?Sized> {
    source: Arc<T>,
    request_timeout: Duration,
}

impl<T: StatusSource + ?Sized> Clone for ReadinessProber<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            request_timeout: self.request_timeout,
        }
    }
}

impl<T: StatusSource + ?Sized> ReadinessProber<T> {
    pub fn new(source: Arc<T>, request_timeout: Duration) -> Self {
        Self {
            source,
            request_timeout,
        }
    }

    pub fn source(&self) -> &Arc<T> {
        &self.source
    }

    /// Poll until ready or the deadline passes
    ///
    /// Never fails on unreadiness; inspect `succeeded` on the result.
    /// At least one attempt is made even with a zero timeout.
    /// With `Scheme::Auto` each attempt tries https then http, and once a
    /// scheme has answered only that scheme is used.
    pub async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let url = target.url();
        let start = Instant::now();
        let deadline = deadline_after(start, target.timeout);
        let mut attempts = 0u32;
        let mut last_status = None;
        let mut answered: Option<Scheme> = None;

        tracing::info!(
            url = %url,
            timeout_secs = target.timeout.as_secs_f64(),
            interval_secs = target.poll_interval.as_secs_f64(),
            expected = %target.expected_status,
            "Waiting for endpoint"
        );

        loop {
            let attempt_start = Instant::now();
            attempts += 1;

            let remaining = deadline.saturating_duration_since(attempt_start);
            let budget = if remaining.is_zero() {
                self.request_timeout
            } else {
                self.request_timeout.min(remaining)
            };

            let pinned = answered.map(|scheme| [scheme]);
            let schemes: &[Scheme] = match &pinned {
                Some(one) => one,
                None => target.scheme.candidates(),
            };

            let outcome = time::timeout(budget, self.first_answer(target, schemes)).await;
            match outcome {
                Ok(Ok((scheme, status))) => {
                    last_status = Some(status);
                    answered = Some(scheme);
                    if target.expected_status.accepts(status) {
                        let elapsed = start.elapsed();
                        tracing::info!(
                            url = %target.url_for(scheme),
                            status,
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Endpoint ready"
                        );
                        return ProbeResult {
                            succeeded: true,
                            attempts,
                            last_status,
                            scheme: answered,
                            elapsed,
                        };
                    }
                    tracing::debug!(attempt = attempts, status, "Endpoint not ready yet");
                }
                Ok(Err(e)) => {
                    tracing::debug!(attempt = attempts, error = %e, "Probe attempt failed");
                }
                Err(_) => {
                    tracing::debug!(
                        attempt = attempts,
                        budget_ms = budget.as_millis() as u64,
                        "Probe attempt timed out"
                    );
                }
            }

            // Fixed cadence from the start of each attempt, never past the deadline
            let next_attempt = deadline_after(attempt_start, target.poll_interval).min(deadline);
            time::sleep_until(next_attempt).await;

            if Instant::now() >= deadline {
                break;
            }
        }

        let elapsed = start.elapsed();
        tracing::warn!(
            url = %url,
            attempts,
            last_status = ?last_status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Endpoint did not become ready before the deadline"
        );

        ProbeResult {
            succeeded: false,
            attempts,
            last_status,
            scheme: answered,
            elapsed,
        }
    }

    /// First scheme that returns any status; errors fall through to the next
    async fn first_answer(
        &self,
        target: &ProbeTarget,
        schemes: &[Scheme],
    ) -> DevctlResult<(Scheme, u16)> {
        let mut last_error = None;

        for &scheme in schemes {
            match self.source.get_status(&target.url_for(scheme)).await {
                Ok(status) => return Ok((scheme, status)),
                Err(e) => {
                    if schemes.len() > 1 {
                        tracing::debug!(scheme = scheme.as_str(), error = %e, "Scheme did not answer");
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DevctlError::InvalidTarget("no scheme to try".to_string())))
    }

    /// Validate the target, poll, and turn unreadiness into `DevctlError::Timeout`
    pub async fn wait_ready(&self, target: &ProbeTarget) -> DevctlResult<ProbeResult> {
        target.validate()?;

        let result = self.probe(target).await;
        into_ready(target, result)
    }

    /// A single attempt, no polling
    pub async fn probe_once(&self, target: &ProbeTarget) -> Option<u16> {
        let url = target.url();
        let attempt = self.first_answer(target, target.scheme.candidates());
        match time::timeout(self.request_timeout, attempt).await {
            Ok(Ok((_, status))) => Some(status),
            Ok(Err(e)) => {
                tracing::debug!(url = %url, error = %e, "Single probe failed");
                None
            }
            Err(_) => {
                tracing::debug!(url = %url, "Single probe timed out");
                None
            }
        }
    }
}

/// `Ok` for a successful run, `DevctlError::Timeout` otherwise
pub fn into_ready(target: &ProbeTarget, result: ProbeResult) -> DevctlResult<ProbeResult> {
    if result.succeeded {
        Ok(result)
    } else {
        Err(DevctlError::Timeout {
            url: target.resolve(&result).url(),
            attempts: result.attempts,
            last_status: result.last_status,
            elapsed: result.elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{MockResponse, MockStatusSource};
    use common::StatusPolicy;

    fn target(timeout_secs: u64) -> ProbeTarget {
        ProbeTarget::new("127.0.0.1", 8888, "/health")
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_poll_interval(Duration::from_secs(1))
    }

    fn mock_prober(mock: MockStatusSource) -> ReadinessProber<MockStatusSource> {
        ReadinessProber::new(Arc::new(mock), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_three_seconds() {
        let prober = mock_prober(MockStatusSource::ready_after(Duration::from_secs(3), 200));

        let result = prober.probe(&target(20)).await;

        assert!(result.succeeded);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.last_status, Some(200));
        assert!(result.elapsed >= Duration::from_secs(3));
        assert!(result.elapsed < Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out() {
        let prober = mock_prober(MockStatusSource::refusing());

        let result = prober.probe(&target(5)).await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts, 5);
        assert_eq!(result.last_status, None);
        assert!(result.elapsed >= Duration::from_secs(5));
        assert!(result.elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_n_intervals() {
        for n in 0..4u64 {
            let prober = mock_prober(MockStatusSource::ready_after(Duration::from_secs(n), 200));
            let result = prober.probe(&target(10)).await;

            assert!(result.succeeded);
            assert_eq!(result.attempts as u64, n + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_modified_accepted_with_lenient_policy() {
        let prober = mock_prober(MockStatusSource::always(304));
        let lenient = target(5).with_expected(StatusPolicy::ok_or_not_modified());

        let result = prober.probe(&lenient).await;
        assert!(result.succeeded);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.last_status, Some(304));

        // Exact 200 policy keeps polling on 304
        let result = prober.probe(&target(3)).await;
        assert!(!result.succeeded);
        assert_eq!(result.last_status, Some(304));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_ready() {
        let prober = mock_prober(MockStatusSource::always(404));
        let lenient = target(3).with_expected(StatusPolicy::ok_or_not_modified());

        let result = prober.probe(&lenient).await;
        assert!(!result.succeeded);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.last_status, Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_keep_last_observed_status() {
        let mock = MockStatusSource::always(503)
            .then_at(Duration::from_millis(1500), MockResponse::Refused);
        let prober = mock_prober(mock);

        let result = prober.probe(&target(4)).await;
        assert!(!result.succeeded);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.last_status, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempts_bounded_by_deadline() {
        let mock = MockStatusSource::always(200).with_latency(Duration::from_secs(3));
        let prober = ReadinessProber::new(Arc::new(mock), Duration::from_secs(2));

        let result = prober.probe(&target(5)).await;

        assert!(!result.succeeded);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.last_status, None);
        assert!(result.elapsed >= Duration::from_secs(5));
        assert!(result.elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_still_attempts_once() {
        let prober = mock_prober(MockStatusSource::always(200));
        let result = prober.probe(&target(0)).await;

        assert!(result.succeeded);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_maps_timeout() {
        let prober = mock_prober(MockStatusSource::always(500));

        let err = prober.wait_ready(&target(2)).await.unwrap_err();
        match err {
            DevctlError::Timeout {
                attempts,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_status, Some(500));
            }
            e => panic!("Expected Timeout error, got {:?}", e),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_rejects_invalid_target() {
        let mock = MockStatusSource::always(200);
        let prober = ReadinessProber::new(Arc::new(mock.clone()), Duration::from_secs(1));
        let invalid = target(5).with_poll_interval(Duration::ZERO);

        let err = prober.wait_ready(&invalid).await.unwrap_err();
        assert!(matches!(err, DevctlError::InvalidTarget(_)));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_once() {
        let prober = mock_prober(MockStatusSource::always(304));
        assert_eq!(prober.probe_once(&target(5)).await, Some(304));

        let prober = mock_prober(MockStatusSource::refusing());
        assert_eq!(prober.probe_once(&target(5)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_overflow() {
        let prober = mock_prober(MockStatusSource::always(200));
        let huge = target(5).with_timeout(Duration::try_from_secs_f64(1e19).unwrap());

        let result = prober.probe(&huge).await;
        assert!(result.succeeded);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_clamped_to_deadline() {
        let prober = mock_prober(MockStatusSource::refusing());
        let sparse = target(2).with_poll_interval(Duration::from_secs(u64::MAX));

        let result = prober.probe(&sparse).await;
        assert!(!result.succeeded);
        assert_eq!(result.attempts, 1);
        assert!(result.elapsed >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_scheme_falls_back_to_http() {
        let mock = MockStatusSource::always(200);
        mock.set_route("https://", MockResponse::Refused);
        let auto = target(5).with_scheme(Scheme::Auto);

        let result = mock_prober(mock.clone()).probe(&auto).await;
        assert!(result.succeeded);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.scheme, Some(Scheme::Http));
        assert_eq!(
            mock.requested_urls(),
            vec![
                "https://127.0.0.1:8888/health".to_string(),
                "http://127.0.0.1:8888/health".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_scheme_sticks_to_answering_scheme() {
        // https answers but is not ready yet; http is never tried again
        let mock = MockStatusSource::always(503)
            .then_at(Duration::from_secs(2), MockResponse::Status(200));
        let auto = target(5).with_scheme(Scheme::Auto);

        let result = mock_prober(mock.clone()).probe(&auto).await;
        assert!(result.succeeded);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.scheme, Some(Scheme::Https));
        assert!(mock
            .requested_urls()
            .iter()
            .all(|url| url.starts_with("https://")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_scheme_timeout_when_nothing_answers() {
        let mock = MockStatusSource::refusing();
        let auto = target(2).with_scheme(Scheme::Auto);

        let result = mock_prober(mock.clone()).probe(&auto).await;
        assert!(!result.succeeded);
        assert_eq!(result.scheme, None);
        assert_eq!(mock.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_dispatch() {
        let source: Arc<dyn StatusSource> = Arc::new(MockStatusSource::always(200));
        let prober: ReadinessProber<dyn StatusSource> =
            ReadinessProber::new(source, Duration::from_secs(1));

        assert!(prober.probe(&target(1)).await.succeeded);
    }
}
