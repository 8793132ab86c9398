//! Shared plumbing for the HTTP-backed collaborators.
//!
//! This module is only available when the `http` feature is enabled.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// How an outbound call failed, before it is mapped to a [`RagError`](crate::RagError) variant.
#[derive(Debug)]
pub(crate) struct CallFailure {
    pub message: String,
    pub transient: bool,
}

/// Build a client that applies `timeout` to every request.
pub(crate) fn client(timeout: Duration) -> std::result::Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

/// Classify a transport-level failure. Timeouts and connection errors are transient.
pub(crate) fn request_failure(error: &reqwest::Error) -> CallFailure {
    CallFailure {
        message: format!("request failed: {error}"),
        transient: error.is_timeout() || error.is_connect(),
    }
}

/// Classify a failure while receiving a response body. Timeouts and
/// connections dropped mid-body are transient.
pub(crate) fn body_failure(error: &reqwest::Error) -> CallFailure {
    CallFailure {
        message: format!("failed to read response body: {error}"),
        transient: error.is_timeout() || error.is_connect() || error.is_body(),
    }
}

/// Read a success response and decode it as JSON.
///
/// Reading and decoding are separate steps so a stalled body is reported as
/// transient while an undecodable one is not.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, CallFailure> {
    let bytes = response.bytes().await.map_err(|e| body_failure(&e))?;
    serde_json::from_slice(&bytes).map_err(|e| CallFailure {
        message: format!("failed to parse response: {e}"),
        transient: false,
    })
}

/// 429 and 5xx responses are worth retrying; other statuses are not.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Object { message: String },
    Text(String),
}

/// Turn a non-success response into a [`CallFailure`], extracting the
/// provider's error message when the body carries one.
pub(crate) async fn status_failure(response: reqwest::Response) -> CallFailure {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            let failure = body_failure(&e);
            return CallFailure {
                message: format!("API returned {status}; {}", failure.message),
                transient: is_transient_status(status) || failure.transient,
            };
        }
    };
    let detail = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(ErrorResponse { error: ErrorDetail::Object { message } }) => message,
        Ok(ErrorResponse { error: ErrorDetail::Text(message) }) => message,
        Err(_) => body,
    };
    CallFailure {
        message: format!("API returned {status}: {detail}"),
        transient: is_transient_status(status),
    }
}
