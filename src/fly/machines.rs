//! Fly Machines REST API client.
//!
//! The Machines API is only reachable through a local tunnel (see
//! [`verify_tunnel`](super::tunnel::verify_tunnel)), so every call returns the
//! raw reply and leaves status interpretation to the caller.

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

use crate::error::{ApiError, Result};

use super::types::CreateMachineRequest;

/// Default local tunnel endpoint of the Machines API.
pub const DEFAULT_MACHINES_URL: &str = "http://127.0.0.1:4280";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Transport failure talking to the Machines API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MachineApiError {
    /// Description of the failure.
    pub message: String,
}

impl MachineApiError {
    /// Creates a new error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Raw HTTP reply from the Machines API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Request URI.
    pub uri: String,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decoder error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Decodes the body as a JSON object, or an empty map if it is not one.
    #[must_use]
    pub fn error_body(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_slice(&self.body).unwrap_or_default()
    }

    /// Renders the status as `404 Not Found`.
    #[must_use]
    pub fn status_line(&self) -> String {
        match StatusCode::from_u16(self.status) {
            Ok(code) => code.canonical_reason().map_or_else(
                || code.as_u16().to_string(),
                |reason| format!("{} {reason}", code.as_u16()),
            ),
            Err(_) => self.status.to_string(),
        }
    }

    /// Renders `"{status}, {uri}, {body}"` for failure diagnostics.
    #[must_use]
    pub fn failure_detail(&self) -> String {
        format!(
            "{}, {}, {}",
            self.status_line(),
            self.uri,
            serde_json::Value::Object(self.error_body())
        )
    }
}

/// Machines API operations used by the machine reconciler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MachineApi: Send + Sync {
    /// Issues `GET {base}/bogus`, used to check the tunnel.
    async fn probe(&self) -> std::result::Result<HttpReply, MachineApiError>;

    /// `POST /v1/apps/{app}/machines`.
    async fn create_machine(
        &self,
        app: &str,
        request: &CreateMachineRequest,
    ) -> std::result::Result<HttpReply, MachineApiError>;

    /// `GET /v1/apps/{app}/machines/{id}`.
    async fn get_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError>;

    /// `POST /v1/apps/{app}/machines/{id}/stop`.
    async fn stop_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError>;

    /// `DELETE /v1/apps/{app}/machines/{id}`.
    async fn delete_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError>;
}

/// HTTP client for the Machines API.
#[derive(Debug, Clone)]
pub struct MachinesClient {
    client: Client,
    base_url: String,
    token: String,
}

impl MachinesClient {
    /// Creates a client against the default local tunnel.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(DEFAULT_MACHINES_URL, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&CreateMachineRequest>,
    ) -> std::result::Result<HttpReply, MachineApiError> {
        let uri = format!("{}{path}", self.base_url);
        trace!("{method} {uri}");

        let mut request = self
            .client
            .request(method, &uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MachineApiError::new(format!("Request to {uri} failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| MachineApiError::new(format!("Failed to read body from {uri}: {e}")))?;

        Ok(HttpReply {
            status,
            uri,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl MachineApi for MachinesClient {
    async fn probe(&self) -> std::result::Result<HttpReply, MachineApiError> {
        self.send(Method::GET, "/bogus", None).await
    }

    async fn create_machine(
        &self,
        app: &str,
        request: &CreateMachineRequest,
    ) -> std::result::Result<HttpReply, MachineApiError> {
        self.send(Method::POST, &format!("/v1/apps/{app}/machines"), Some(request))
            .await
    }

    async fn get_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError> {
        self.send(Method::GET, &format!("/v1/apps/{app}/machines/{id}"), None)
            .await
    }

    async fn stop_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError> {
        self.send(Method::POST, &format!("/v1/apps/{app}/machines/{id}/stop"), None)
            .await
    }

    async fn delete_machine(
        &self,
        app: &str,
        id: &str,
    ) -> std::result::Result<HttpReply, MachineApiError> {
        self.send(Method::DELETE, &format!("/v1/apps/{app}/machines/{id}"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fly::types::{GuestRequest, Machine, MachineConfigRequest};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_status_line() {
        let reply = HttpReply {
            status: 404,
            uri: String::from("http://127.0.0.1:4280/bogus"),
            body: Vec::new(),
        };
        assert_eq!(reply.status_line(), "404 Not Found");
        assert!(!reply.is_success());
        assert!(reply.error_body().is_empty());
        assert_eq!(
            reply.failure_detail(),
            "404 Not Found, http://127.0.0.1:4280/bogus, {}"
        );
    }

    #[tokio::test]
    async fn test_create_posts_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/apps/hello/machines"))
            .and(body_json(serde_json::json!({
                "name": "web",
                "region": "ord",
                "config": { "image": "nginx:latest" },
                "guest": { "memory_mb": 512 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "148e",
                "name": "web",
                "state": "created",
                "region": "ord"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = MachinesClient::with_base_url(&server.uri(), "tok", 5).expect("client");
        let request = CreateMachineRequest {
            name: String::from("web"),
            region: Some(String::from("ord")),
            config: MachineConfigRequest {
                image: String::from("nginx:latest"),
            },
            guest: Some(GuestRequest {
                memory_mb: Some(512),
                ..GuestRequest::default()
            }),
        };

        let reply = client.create_machine("hello", &request).await.expect("reply");
        assert!(reply.is_success());

        let machine: Machine = reply.json().expect("machine body");
        assert_eq!(machine.id, "148e");
    }

    #[tokio::test]
    async fn test_error_reply_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/apps/hello/machines/148e"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({ "error": "machine not found" })),
            )
            .mount(&server)
            .await;

        let client = MachinesClient::with_base_url(&server.uri(), "tok", 5).expect("client");
        let reply = client.get_machine("hello", "148e").await.expect("reply");

        assert_eq!(reply.status, 404);
        assert!(reply.uri.ends_with("/v1/apps/hello/machines/148e"));
        assert_eq!(
            reply.error_body().get("error"),
            Some(&serde_json::json!("machine not found"))
        );
    }
}
