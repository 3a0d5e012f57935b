//! Channels app HTTP API client.
//!
//! Implements the vendor HTTP surface over reqwest.
//! API reference: https://getchannels.com/api/
//!
//! The client is stateless: every call carries a bounded timeout and a
//! classified error, and retry policy lives in the adapter.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ClientError;

pub const DEFAULT_PORT: u16 = 57000;

/// Total request timeout. Must stay strictly below the poll interval so a
/// hung request cannot stall the next cycle.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Network location of one Channels app instance.
///
/// Immutable once handed to the adapter; replaced wholesale on
/// reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport seam between the adapter and the device.
///
/// `ChannelsClient` is the real implementation; tests substitute a scripted
/// one to drive the state machine without a network.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Fetch the raw playback status payload.
    async fn fetch_status(&self, address: &DeviceAddress) -> Result<Value, ClientError>;

    /// Send a named control command, optionally with a JSON body.
    async fn send_command(
        &self,
        address: &DeviceAddress,
        command: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError>;
}

/// HTTP client for the Channels app API.
pub struct ChannelsClient {
    http: Client,
}

impl ChannelsClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { http }
    }

    async fn request(
        &self,
        address: &DeviceAddress,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", address.base_url(), path);
        debug!(%url, method = %method, "channels request");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http(status.as_u16()));
        }

        // The app replies with JSON but not always with a JSON content type,
        // so parse the body ourselves instead of using response.json().
        let text = response.text().await.map_err(classify)?;
        serde_json::from_str(&text).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// Return the current playback state.
    pub async fn status(&self, address: &DeviceAddress) -> Result<Value, ClientError> {
        self.request(address, Method::GET, "/api/status", None).await
    }

    /// Return the list of favorite channels.
    pub async fn favorite_channels(
        &self,
        address: &DeviceAddress,
    ) -> Result<Vec<Value>, ClientError> {
        let response = self
            .request(address, Method::GET, "/api/favorite_channels", None)
            .await?;
        Ok(response.as_array().cloned().unwrap_or_default())
    }

    /// Send a named control command (`POST /api/{command}`).
    pub async fn command(
        &self,
        address: &DeviceAddress,
        named_command: &str,
    ) -> Result<Value, ClientError> {
        self.request(address, Method::POST, &format!("/api/{named_command}"), None)
            .await
    }

    /// Display an in-app notification on the device.
    pub async fn notify(
        &self,
        address: &DeviceAddress,
        title: &str,
        message: &str,
    ) -> Result<Value, ClientError> {
        let body = json!({ "title": title, "message": message });
        self.request(address, Method::POST, "/api/notify", Some(&body))
            .await
    }
}

impl Default for ChannelsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceApi for ChannelsClient {
    async fn fetch_status(&self, address: &DeviceAddress) -> Result<Value, ClientError> {
        self.status(address).await
    }

    async fn send_command(
        &self,
        address: &DeviceAddress,
        command: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        match params {
            Some(body) => {
                self.request(address, Method::POST, &format!("/api/{command}"), Some(&body))
                    .await
            }
            None => self.command(address, command).await,
        }
    }
}

fn classify(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(REQUEST_TIMEOUT)
    } else if err.is_decode() {
        ClientError::Malformed(err.to_string())
    } else {
        // Connect failures, refused connections, DNS errors: the device is
        // likely off or rebooting.
        ClientError::Unreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_of(server: &mockito::ServerGuard) -> DeviceAddress {
        let host_port = server.host_with_port();
        let (host, port) = host_port.rsplit_once(':').unwrap();
        DeviceAddress::new(host, port.parse().unwrap())
    }

    #[tokio::test]
    async fn status_hits_api_status_and_parses_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/status")
            .with_status(200)
            // No JSON content type, like the real app
            .with_body(r#"{"status":"playing","muted":false}"#)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        let value = client.status(&address_of(&server)).await.unwrap();

        assert_eq!(value["status"], "playing");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn named_command_posts_to_api_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/toggle_pause")
            .with_status(200)
            .with_body(r#"{"status":"playing"}"#)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        client
            .command(&address_of(&server), "toggle_pause")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn relative_seek_path_carries_signed_offset() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/seek/-30")
            .with_status(200)
            .with_body(r#"{"status":"playing"}"#)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        client.command(&address_of(&server), "seek/-30").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn notify_posts_title_and_message_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/notify")
            .match_body(mockito::Matcher::Json(
                json!({"title": "Recording", "message": "Started"}),
            ))
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        client
            .notify(&address_of(&server), "Recording", "Started")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn favorite_channels_tolerates_non_array_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/favorite_channels")
            .with_status(200)
            .with_body(r#"{"status":"error"}"#)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        let favorites = client
            .favorite_channels(&address_of(&server))
            .await
            .unwrap();

        assert!(favorites.is_empty());
    }

    #[tokio::test]
    async fn server_error_classifies_as_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/status")
            .with_status(500)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        let err = client.status(&address_of(&server)).await.unwrap_err();

        assert!(matches!(err, ClientError::Http(500)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_status_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/status")
            .with_status(404)
            .create_async()
            .await;

        let client = ChannelsClient::new();
        let err = client.status(&address_of(&server)).await.unwrap_err();

        assert!(matches!(err, ClientError::Http(404)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn non_json_body_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/status")
            .with_status(200)
            .with_body("<html>not the api you were looking for</html>")
            .create_async()
            .await;

        let client = ChannelsClient::new();
        let err = client.status(&address_of(&server)).await.unwrap_err();

        assert!(matches!(err, ClientError::Malformed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn refused_connection_classifies_as_transient() {
        // Nothing listens on port 1
        let client = ChannelsClient::new();
        let err = client
            .status(&DeviceAddress::new("127.0.0.1", 1))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
