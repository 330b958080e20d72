use crate::ProviderError;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

pub(crate) const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const MAX_RETRY_WAIT_SECS: u64 = 60;

/// Sends a request, retrying `429` responses in place while honouring
/// `Retry-After`. Every other non-success status becomes `ProviderError::Http`.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, ProviderError> {
    let mut backoff_seconds = 1u64;

    for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
        let attempt_request = request
            .try_clone()
            .ok_or_else(|| ProviderError::Build("request body cannot be replayed".to_string()))?;
        let response = attempt_request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES {
            let wait = retry_after_secs(&response)
                .unwrap_or(backoff_seconds)
                .min(MAX_RETRY_WAIT_SECS);
            warn!(attempt, wait_secs = wait, url = %response.url(), "provider rate limited");
            tokio::time::sleep(Duration::from_secs(wait)).await;
            backoff_seconds = (backoff_seconds * 2).min(32);
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        return Ok(response);
    }

    Err(ProviderError::Data("rate limit retries exhausted".to_string()))
}

pub(crate) async fn send_json<T>(request: RequestBuilder) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
{
    let response = send(request).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

pub(crate) async fn send_empty(request: RequestBuilder) -> Result<(), ProviderError> {
    send(request).await.map(|_| ())
}

fn retry_after_secs(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
