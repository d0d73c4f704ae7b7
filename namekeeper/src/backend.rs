//!
//! HTTP client for the remote key-management API.
//!
//! Every response body carries a `status` sentinel next to the payload;
//! the keystore layer treats anything but `ok` as a failure. Key bytes
//! travel hex encoded.
//!

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::keystore::{HasResponse, KeyBackend, KeyResponse, KeyStatus};

/// Failures of the remote call itself, as opposed to a well-formed
/// response with a non-success status.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("key backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("key backend responded with HTTP {status}")]
    Http { status: reqwest::StatusCode },
    #[error("could not decode key backend response: {reason}")]
    Decode { reason: String },
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    name: &'a str,
    private_key: String,
}

#[derive(Deserialize)]
struct GetResponseBody {
    status: String,
    #[serde(default)]
    private_key: String,
}

#[derive(Deserialize)]
struct HasResponseBody {
    status: String,
    #[serde(default)]
    exists: bool,
}

#[derive(Deserialize)]
struct StatusResponseBody {
    status: String,
}

/// Unknown status strings are failures, not successes.
fn status_from_wire(status: &str) -> KeyStatus {
    match status {
        "ok" => KeyStatus::Ok,
        "not-found" => KeyStatus::NotFound,
        _ => KeyStatus::Error,
    }
}

/// Production [`KeyBackend`] speaking the backend's JSON API over HTTP:
/// `POST {base}/v1/keys/{get,has,put}`.
#[derive(Debug, Clone)]
pub struct HttpKeyBackend {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpKeyBackend {
    pub fn new(base_url: Url) -> Self {
        Self::new_with_client(base_url, reqwest::Client::new())
    }

    /// Use a preconfigured reqwest client (timeouts, proxies, TLS).
    pub fn new_with_client(base_url: Url, http: reqwest::Client) -> Self {
        Self { base_url, http }
    }

    fn endpoint(&self, op: &str) -> String {
        format!(
            "{}/v1/keys/{op}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn call<Req, Resp>(&self, op: &str, request: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(op))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Http {
                status: response.status(),
            });
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| BackendError::Decode {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl KeyBackend for HttpKeyBackend {
    async fn get_private_key(&self, name: &str) -> Result<KeyResponse, BackendError> {
        let body: GetResponseBody = self.call("get", &KeyRequest { name }).await?;
        let private_key = hex::decode(&body.private_key).map_err(|e| BackendError::Decode {
            reason: format!("private_key field: {e}"),
        })?;
        Ok(KeyResponse {
            status: status_from_wire(&body.status),
            private_key,
        })
    }

    async fn has_private_key(&self, name: &str) -> Result<HasResponse, BackendError> {
        let body: HasResponseBody = self.call("has", &KeyRequest { name }).await?;
        Ok(HasResponse {
            status: status_from_wire(&body.status),
            exists: body.exists,
        })
    }

    async fn put_private_key(&self, name: &str, secret: &[u8]) -> Result<KeyStatus, BackendError> {
        let request = PutRequest {
            name,
            private_key: hex::encode(secret),
        };
        let body: StatusResponseBody = self.call("put", &request).await?;
        Ok(status_from_wire(&body.status))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pkarr::Keypair;

    use crate::backend::{BackendError, HttpKeyBackend};
    use crate::keystore::{KeyBackend, KeyStatus};

    fn backend_for(server: &MockServer) -> HttpKeyBackend {
        HttpKeyBackend::new(server.base_url().parse().unwrap())
    }

    #[tokio::test]
    async fn get_decodes_key_bytes_from_a_success_response() {
        let server = MockServer::start_async().await;
        let keypair = Keypair::random();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/keys/get")
                    .json_body(serde_json::json!({ "name": "alice" }));
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "private_key": hex::encode(keypair.secret_key()),
                }));
            })
            .await;

        let response = backend_for(&server).get_private_key("alice").await.unwrap();
        assert_eq!(response.status, KeyStatus::Ok);
        assert_eq!(response.private_key, keypair.secret_key().to_vec());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_surfaces_the_not_found_sentinel() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/keys/get");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "not-found" }));
            })
            .await;

        let response = backend_for(&server).get_private_key("bob").await.unwrap();
        assert_eq!(response.status, KeyStatus::NotFound);
        assert!(response.private_key.is_empty());
    }

    #[tokio::test]
    async fn unknown_status_strings_map_to_the_error_sentinel() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/keys/get");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "revoked" }));
            })
            .await;

        let response = backend_for(&server).get_private_key("bob").await.unwrap();
        assert_eq!(response.status, KeyStatus::Error);
    }

    #[tokio::test]
    async fn non_success_http_responses_are_backend_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/keys/get");
                then.status(503);
            })
            .await;

        let err = backend_for(&server)
            .get_private_key("alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Http { .. }));
    }

    #[tokio::test]
    async fn malformed_key_hex_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/keys/get");
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "private_key": "not hex",
                }));
            })
            .await;

        let err = backend_for(&server)
            .get_private_key("alice")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }));
    }

    #[tokio::test]
    async fn has_reports_existence_next_to_the_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/keys/has")
                    .json_body(serde_json::json!({ "name": "alice" }));
                then.status(200)
                    .json_body(serde_json::json!({ "status": "ok", "exists": true }));
            })
            .await;

        let response = backend_for(&server).has_private_key("alice").await.unwrap();
        assert_eq!(response.status, KeyStatus::Ok);
        assert!(response.exists);
    }

    #[tokio::test]
    async fn put_sends_hex_encoded_key_material() {
        let server = MockServer::start_async().await;
        let keypair = Keypair::random();
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/keys/put")
                    .json_body(serde_json::json!({
                        "name": "alice",
                        "private_key": hex::encode(keypair.secret_key()),
                    }));
                then.status(200)
                    .json_body(serde_json::json!({ "status": "ok" }));
            })
            .await;

        let status = backend_for(&server)
            .put_private_key("alice", &keypair.secret_key())
            .await
            .unwrap();
        assert_eq!(status, KeyStatus::Ok);
        mock.assert_async().await;
    }
}
