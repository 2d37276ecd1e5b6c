use crate::errors::UpstreamError;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

/// Statuses worth retrying for reads.
pub(crate) const RETRIABLE_READ_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

/// A rate-limited write was never applied, so only 429 is safe to retry.
pub(crate) const RETRIABLE_WRITE_STATUS_CODES: &[StatusCode] = &[StatusCode::TOO_MANY_REQUESTS];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Sends the request built by `build`, retrying retriable statuses with
/// exponential backoff. Non-success responses are turned into errors.
pub(crate) async fn send_with_retry<F>(
    policy: RetryPolicy,
    retriable: &[StatusCode],
    build: F,
) -> Result<Response, UpstreamError>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;

    loop {
        let response = build().send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if retriable.contains(&status) {
            if retries < policy.max_retries {
                // Backoff between retries
                let delay = policy.base_delay * 2_u32.pow(retries);
                tracing::debug!(%status, retries, ?delay, "Retrying upstream request");
                sleep(delay).await;
                retries += 1;
                continue;
            }
            return Err(UpstreamError::RetriesExceeded(status));
        }

        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status { status, body });
    }
}
