//! `RemoteApi` over HTTP with bearer-token sessions.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::remote::{RemoteApi, RemoteError};
use crate::models::{Collection, Document, DocumentId, PullResponse};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const HTTP_TIMEOUT_SECS: u64 = 15;

/// Credentials of the signed-in member
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

pub struct HttpRemoteApi {
    base_url: String,
    client: reqwest::Client,
    session: RwLock<Option<Session>>,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, session: Option<Session>) -> Result<Self, RemoteError> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| RemoteError::Network(error.to_string()))?;
        Ok(Self {
            base_url,
            client,
            session: RwLock::new(session),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> Option<Session> {
        match self.session.read() {
            Ok(session) => session.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut current) => *current = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    fn access_token(&self) -> Result<String, RemoteError> {
        self.session()
            .map(|session| session.access_token)
            .ok_or(RemoteError::NotAuthenticated)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, RemoteError> {
        let token = self.access_token()?;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(network_error)?;
        read_response(response).await
    }
}

impl RemoteApi for HttpRemoteApi {
    fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    async fn create(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<Option<Document>, RemoteError> {
        let request = self.client.post(self.api_url(collection.as_str())).json(document);
        self.send(request).await
    }

    async fn replace(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<Option<Document>, RemoteError> {
        let url = self.api_url(&format!("{collection}/{}", document.id));
        self.send(self.client.put(url).json(document)).await
    }

    async fn delete(&self, collection: Collection, id: &DocumentId) -> Result<(), RemoteError> {
        let url = self.api_url(&format!("{collection}/{id}"));
        self.send::<serde_json::Value>(self.client.delete(url))
            .await
            .map(|_| ())
    }

    async fn pull(&self, collection: Collection, since: i64) -> Result<PullResponse, RemoteError> {
        let url = self.api_url(&format!("{collection}/sync/{since}"));
        self.send(self.client.get(url))
            .await?
            .ok_or_else(|| RemoteError::Decode("empty sync response".to_string()))
    }

    async fn refresh_session(&self) -> Result<(), RemoteError> {
        let refresh_token = self
            .session()
            .and_then(|session| session.refresh_token)
            .ok_or(RemoteError::NotAuthenticated)?;

        let response = self
            .client
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(network_error)?;
        let refreshed: RefreshResponse = read_response(response)
            .await?
            .ok_or_else(|| RemoteError::Decode("empty refresh response".to_string()))?;

        let access_token = normalize_text_option(Some(refreshed.access_token))
            .ok_or_else(|| RemoteError::Decode("refresh response without access token".to_string()))?;
        self.set_session(Some(Session {
            access_token,
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
        }));
        tracing::info!("Session refreshed");
        Ok(())
    }

    fn end_session(&self) {
        self.set_session(None);
        tracing::info!("Session ended");
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map_err(network_error)?;
        read_response::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(network_error)?;

    if !status.is_success() {
        return Err(RemoteError::Status {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        });
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|error| RemoteError::Decode(error.to_string()))
}

fn network_error(error: reqwest::Error) -> RemoteError {
    RemoteError::Network(error.to_string())
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String, RemoteError> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| RemoteError::Network("API URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::Network(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fields;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"invalid","message":"title is required"}"#,
        );
        assert_eq!(message, "title is required (422)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)"
        );
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = Session {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requests_without_session_fail_fast() {
        let api = HttpRemoteApi::new("http://127.0.0.1:9", None).unwrap();
        assert!(!api.is_authenticated());

        let document = Document::new(Fields::new(), 1);
        let result = api.create(Collection::Events, &document).await;
        assert_eq!(result, Err(RemoteError::NotAuthenticated));
        assert_eq!(api.refresh_session().await, Err(RemoteError::NotAuthenticated));
    }

    #[test]
    fn end_session_clears_credentials() {
        let api = HttpRemoteApi::new("http://localhost:8080", Some(Session::new("token"))).unwrap();
        assert!(api.is_authenticated());
        api.end_session();
        assert!(api.session().is_none());
    }
}
