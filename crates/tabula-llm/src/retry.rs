//! # Turn Retry
//!
//! Wraps a provider with exponential backoff.
//!
//! **Key constraint**: a turn is only retried while nothing has been yielded.
//! Once the first [`ProtocolEvent`] reaches the caller the agent may already
//! have acted on it, so later failures pass straight through.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabula_settings::RetrySettings;
use tracing::warn;

use crate::provider::{
    ProtocolEvent, ProtocolEventStream, Provider, ProviderError, ProviderResult, TurnRequest,
};

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay_ms: s.base_delay_ms,
            max_delay_ms: s.max_delay_ms,
            jitter_factor: s.jitter_factor,
        }
    }
}

/// Backoff delay for retry number `attempt` (1-based).
///
/// `random` should be a value in `[0.0, 1.0)`; it maps to a factor in
/// `[1 - jitter, 1 + jitter]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponent = attempt.saturating_sub(1).min(31);
    let exponential = base_delay_ms.saturating_mul(1u64 << exponent);
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    ((capped as f64) * jitter).round().max(0.0) as u64
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are not supported and yield `None`.
#[must_use]
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|s| s.saturating_mul(1000))
}

/// Creates a fresh turn stream on each attempt.
pub type StreamFactory = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = ProviderResult<ProtocolEventStream>> + Send>>
        + Send
        + Sync,
>;

/// Wrap a stream factory with retry logic.
///
/// Failures while opening the stream, and a failure arriving as the very
/// first item, are retried when [`ProviderError::is_retryable`] allows it.
pub fn with_provider_retry(factory: StreamFactory, config: RetryConfig) -> ProtocolEventStream {
    use futures::StreamExt;

    type Item = Result<ProtocolEvent, ProviderError>;

    Box::pin(async_stream::stream! {
        let mut attempt = 0u32;

        'attempts: loop {
            let failure = match factory().await {
                Ok(mut inner) => {
                    let mut has_yielded = false;
                    let mut failure = None;
                    while let Some(item) = inner.next().await {
                        match item {
                            Err(err) if !has_yielded => {
                                failure = Some(err);
                                break;
                            }
                            other => {
                                has_yielded = true;
                                let v: Item = other;
                                yield v;
                            }
                        }
                    }
                    match failure {
                        Some(err) => err,
                        None => break 'attempts,
                    }
                }
                Err(err) => err,
            };

            if !failure.is_retryable() || attempt >= config.max_retries {
                let v: Item = Err(failure);
                yield v;
                break;
            }

            attempt += 1;
            let backoff_ms = calculate_backoff_delay_with_random(
                attempt,
                config.base_delay_ms,
                config.max_delay_ms,
                config.jitter_factor,
                rand::random::<f64>(),
            );
            let delay_ms = failure
                .retry_after_ms()
                .map_or(backoff_ms, |ra| backoff_ms.max(ra));
            warn!(
                attempt,
                max_retries = config.max_retries,
                delay_ms,
                category = failure.category(),
                error = %failure,
                "retrying model turn"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    })
}

/// A provider that retries every turn of the wrapped provider.
pub struct RetryingProvider<P> {
    inner: Arc<P>,
    config: RetryConfig,
}

impl<P: Provider + 'static> RetryingProvider<P> {
    /// Wrap `inner`.
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config,
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> Provider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_turn(&self, request: &TurnRequest) -> ProviderResult<ProtocolEventStream> {
        let inner = Arc::clone(&self.inner);
        let request = Arc::new(request.clone());
        let factory: StreamFactory = Box::new(move || {
            let inner = Arc::clone(&inner);
            let request = Arc::clone(&request);
            Box::pin(async move { inner.create_turn(&request).await })
        });
        Ok(with_provider_retry(factory, self.config.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tabula_core::ResponseId;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::Api {
            status: 500,
            message: "Server error".into(),
            code: None,
            retryable: true,
        }
    }

    fn ok_stream() -> ProtocolEventStream {
        let id = ResponseId::from("resp_1");
        Box::pin(futures::stream::iter(vec![
            Ok(ProtocolEvent::ResponseCreated {
                response_id: id.clone(),
            }),
            Ok(ProtocolEvent::ResponseCompleted { response_id: id }),
        ]))
    }

    fn failing_factory(fail_count: u32, counter: Arc<AtomicU32>) -> StreamFactory {
        Box::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                if counter.fetch_add(1, Ordering::SeqCst) < fail_count {
                    Err(server_error())
                } else {
                    Ok(ok_stream())
                }
            })
        })
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(calculate_backoff_delay_with_random(1, 1000, 30_000, 0.0, 0.5), 1000);
        assert_eq!(calculate_backoff_delay_with_random(2, 1000, 30_000, 0.0, 0.5), 2000);
        assert_eq!(calculate_backoff_delay_with_random(3, 1000, 30_000, 0.0, 0.5), 4000);
        assert_eq!(calculate_backoff_delay_with_random(10, 1000, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn backoff_jitter_bounds() {
        assert_eq!(calculate_backoff_delay_with_random(1, 1000, 30_000, 0.2, 0.0), 800);
        assert_eq!(calculate_backoff_delay_with_random(1, 1000, 30_000, 0.2, 0.5), 1000);
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after_header("3"), Some(3000));
        assert_eq!(parse_retry_after_header("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let events: Vec<_> = with_provider_retry(failing_factory(2, counter.clone()), fast())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(Result::is_ok));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let events: Vec<_> = with_provider_retry(failing_factory(10, counter.clone()), fast())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_matches!(events[0], Err(ProviderError::Api { status: 500, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let factory: StreamFactory = Box::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(ProviderError::Auth {
                    message: "bad key".into(),
                })
            })
        });
        let events: Vec<_> = with_provider_retry(factory, fast()).collect().await;
        assert_matches!(events[0], Err(ProviderError::Auth { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_retry_after_first_event() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let factory: StreamFactory = Box::new(move || {
            let _ = c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                let stream: ProtocolEventStream = Box::pin(futures::stream::iter(vec![
                    Ok(ProtocolEvent::TextDelta { delta: "hi".into() }),
                    Err(server_error()),
                ]));
                Ok(stream)
            })
        });
        let events: Vec<_> = with_provider_retry(factory, fast()).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
