use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::TransportError;
use crate::{truncate_text, ClientConfig, Credential};

pub const IMAGES_PATH: &str = "/v1/images/generations";
pub const SUBMIT_PATH: &str = "/v1/tasks/submit";
pub const STATUS_PATH: &str = "/v1/tasks/status";

/// The four remote calls the clients make. One transport is shared by every job, so
/// implementations must tolerate concurrent use.
pub trait Transport: Send + Sync {
    fn generate_images(&self, payload: &Value) -> Result<Value, TransportError>;
    fn submit_task(&self, payload: &Value) -> Result<Value, TransportError>;
    fn task_status(&self, task_id: &str) -> Result<Value, TransportError>;
    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// `reqwest` blocking transport; the inner client owns the connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: ClientConfig,
    credential: Credential,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(config: ClientConfig, credential: Credential) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .build()
            .map_err(|err| TransportError::Transient(format!("http client init failed: {err}")))?;
        Ok(Self {
            config,
            credential,
            http,
        })
    }

    fn post_json(&self, path: &str, payload: &Value) -> Result<Value, TransportError> {
        let endpoint = self.config.endpoint(path);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.credential.secret())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .timeout(self.config.request_timeout)
            .send()
            .map_err(|err| classify_send_error(&endpoint, err))?;
        response_json_or_error(response)
    }
}

impl Transport for HttpTransport {
    fn generate_images(&self, payload: &Value) -> Result<Value, TransportError> {
        self.post_json(IMAGES_PATH, payload)
    }

    fn submit_task(&self, payload: &Value) -> Result<Value, TransportError> {
        self.post_json(SUBMIT_PATH, payload)
    }

    fn task_status(&self, task_id: &str) -> Result<Value, TransportError> {
        let endpoint = self.config.endpoint(STATUS_PATH);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("task_id", task_id)])
            .bearer_auth(self.credential.secret())
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
            .send()
            .map_err(|err| classify_send_error(&endpoint, err))?;
        response_json_or_error(response)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .map_err(|err| classify_send_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, &body));
        }
        let bytes = response
            .bytes()
            .map_err(|err| TransportError::Transient(format!("body read failed ({url}): {err}")))?;
        Ok(bytes.to_vec())
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, TransportError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| TransportError::Transient(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        TransportError::Decode(format!("{err}: {}", truncate_text(&body, 256)))
    })
}

/// 401 is reported as a bad key; 429 and 5xx are worth retrying, other codes are not.
pub(crate) fn status_error(status: StatusCode, body: &str) -> TransportError {
    let code = status.as_u16();
    if status == StatusCode::UNAUTHORIZED {
        return TransportError::Rejected {
            status: code,
            message: "Unauthorized: Invalid API key".to_string(),
        };
    }
    let message = error_message_from_body(body).unwrap_or_else(|| format!("Error: {code}"));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::Transient(format!("HTTP {code}: {message}"));
    }
    TransportError::Rejected {
        status: code,
        message,
    }
}

/// Pulls `error` (string or `{message}`) or `message` out of an error body.
pub(crate) fn error_message_from_body(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let candidate = parsed
        .get("error")
        .and_then(|error| match error {
            Value::String(text) => Some(text.clone()),
            Value::Object(map) => map.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .or_else(|| parsed.get("message").and_then(Value::as_str).map(str::to_string))?;
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_text(trimmed, 512))
}

fn classify_send_error(endpoint: &str, err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        return TransportError::Rejected {
            status: 0,
            message: format!("invalid request for {endpoint}: {err}"),
        };
    }
    if err.is_decode() {
        return TransportError::Decode(format!("{endpoint}: {err}"));
    }
    TransportError::Transient(format!("{endpoint}: {err}"))
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::{error_message_from_body, status_error};
    use crate::error::TransportError;

    #[test]
    fn unauthorized_is_rejected_with_key_hint() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "{}"),
            TransportError::Rejected {
                status: 401,
                message: "Unauthorized: Invalid API key".to_string(),
            }
        );
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "{\"error\":\"busy\"}").is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!status_error(StatusCode::NOT_FOUND, "").is_transient());
    }

    #[test]
    fn client_errors_carry_the_body_message() {
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, "{\"error\":\"prompt too long\"}"),
            TransportError::Rejected {
                status: 400,
                message: "prompt too long".to_string(),
            }
        );
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, "<html>nope</html>"),
            TransportError::Rejected {
                status: 403,
                message: "Error: 403".to_string(),
            }
        );
    }

    #[test]
    fn error_message_accepts_nested_and_flat_shapes() {
        assert_eq!(
            error_message_from_body("{\"error\":{\"message\":\"quota\"}}"),
            Some("quota".to_string())
        );
        assert_eq!(
            error_message_from_body("{\"message\":\"bad seed\"}"),
            Some("bad seed".to_string())
        );
        assert_eq!(error_message_from_body("{\"error\":\"  \"}"), None);
        assert_eq!(error_message_from_body("not json"), None);
    }
}
