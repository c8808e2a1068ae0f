//! `reqwest`-backed implementation of [`Backend`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::backend::Backend;
use crate::client::errors::ApiError;
use crate::client::responses::{
    CheckoutRequest, CheckoutResponse, ConnectedDevicesResponse, ConnectionStatusResponse,
    DisconnectRequest, DisconnectResponse, GenerateCodeRequest, GenerateCodeResponse,
};
use crate::config::ApiConfig;
use crate::entitlement::EntitlementState;
use crate::errors::{TetherError, TetherResult};

/// Header carrying the application key on entitlement checks.
pub const APP_KEY_HEADER: &str = "X-App-Key";

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    app_key: String,
}

impl HttpBackend {
    /// Build a backend from the `[api]` configuration section.
    pub fn new(config: &ApiConfig) -> TetherResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Self::with_client(client, &config.base_url, &config.app_key)
    }

    /// Build a backend around an existing client (shared connection pool).
    pub fn with_client(client: Client, base_url: &str, app_key: &str) -> TetherResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            TetherError::ConfigError(format!("invalid api.base_url '{base_url}': {e}"))
        })?;

        if base_url.cannot_be_a_base() {
            return Err(TetherError::ConfigError(format!(
                "api.base_url '{base_url}' cannot be used as a base URL"
            )));
        }

        Ok(Self {
            client,
            base_url,
            app_key: app_key.to_string(),
        })
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> TetherResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TetherError::ConfigError("api.base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn parse_response<T: DeserializeOwned>(resp: Response) -> TetherResult<T> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            debug!(status = %status, "backend request failed");
            return Err(ApiError::from_body(status.as_u16(), &body).into());
        }

        serde_json::from_str(&body)
            .map_err(|e| TetherError::ServerError(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn generate_code(
        &self,
        id_token: &str,
        request: &GenerateCodeRequest,
    ) -> TetherResult<GenerateCodeResponse> {
        let resp = self
            .client
            .post(self.endpoint(&["pairing", "generate-code"])?)
            .bearer_auth(id_token)
            .json(request)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn connection_status(&self, code: &str) -> TetherResult<ConnectionStatusResponse> {
        let resp = self
            .client
            .get(self.endpoint(&["pairing", "connection-status", code])?)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn connected_devices(
        &self,
        id_token: &str,
        account_id: &str,
    ) -> TetherResult<ConnectedDevicesResponse> {
        let resp = self
            .client
            .get(self.endpoint(&["pairing", "connected-devices", account_id])?)
            .bearer_auth(id_token)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn disconnect_device(
        &self,
        id_token: &str,
        request: &DisconnectRequest,
    ) -> TetherResult<DisconnectResponse> {
        let resp = self
            .client
            .post(self.endpoint(&["pairing", "disconnect-device"])?)
            .bearer_auth(id_token)
            .json(request)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn verify_entitlement(&self, hardware_id: &str) -> TetherResult<EntitlementState> {
        let resp = self
            .client
            .get(self.endpoint(&["entitlement", "verify"])?)
            .query(&[("hardwareId", hardware_id)])
            .header(APP_KEY_HEADER, &self.app_key)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    async fn verify_checkout(
        &self,
        id_token: &str,
        request: &CheckoutRequest,
    ) -> TetherResult<CheckoutResponse> {
        let resp = self
            .client
            .post(self.endpoint(&["payments", "verify-checkout"])?)
            .bearer_auth(id_token)
            .json(request)
            .send()
            .await?;

        Self::parse_response(resp).await
    }
}
