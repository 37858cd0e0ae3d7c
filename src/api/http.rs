//! HTTP utilities for action calls

use crate::error::ActionError;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate and strip non-printable characters before logging a body
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for action calls
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudrecon/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET `url` with query pairs; error bodies become classified [`ActionError`]s
    pub async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        token: Option<&str>,
    ) -> std::result::Result<Value, ActionError> {
        tracing::debug!("GET {} ({} params)", url, query.len());

        let mut request = self.client.get(url).query(query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActionError::other(format!("failed to send request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ActionError::other(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(parse_error(status, &body));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| ActionError::other(format!("failed to parse response JSON: {}", e)))
    }
}

/// `{"Error": {"Code": .., "Message": ..}, "RequestId": ..}`
pub fn parse_error(status: StatusCode, body: &str) -> ActionError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("Error"));
    let code = error
        .and_then(|e| e.get("Code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = error
        .and_then(|e| e.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("API request failed: {}", status));
    let request_id = parsed
        .as_ref()
        .and_then(|v| v.get("RequestId"))
        .and_then(Value::as_str)
        .map(str::to_string);

    ActionError::classify(Some(status.as_u16()), code, message).with_request_id(request_id)
}
