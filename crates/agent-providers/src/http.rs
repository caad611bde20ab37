//! Shared HTTP plumbing for provider clients.

use agent_core::{AgentError, Result};
use serde::de::DeserializeOwned;

const BODY_PREVIEW_LIMIT: usize = 200;

/// Send a prepared request and decode the JSON body, classifying failures
/// into the provider error taxonomy.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|err| AgentError::Network(format!("{}: {}", provider, err)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(provider, status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|err| AgentError::MalformedResponse(format!("{}: {}", provider, err)))
}

/// Map an error status to the taxonomy: 401/403 auth, 429 rate limit,
/// anything else a non-retryable provider failure.
pub(crate) fn classify_status(provider: &str, status: u16, body: &str) -> AgentError {
    let detail = format!("{}: HTTP {}: {}", provider, status, preview(body));
    match status {
        401 | 403 => AgentError::Auth(detail),
        429 => AgentError::RateLimited(detail),
        _ => AgentError::Provider(detail),
    }
}

fn preview(body: &str) -> &str {
    if body.len() <= BODY_PREVIEW_LIMIT {
        return body;
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
