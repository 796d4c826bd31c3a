//! Panel-side HMAC-signing transport to a single Agent.
//!
//! Every call signs the request, bounds it with a timeout, and maps
//! transport failures to `AGENT_UNREACHABLE`, non-2xx Agent responses to
//! `AGENT_ERROR`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use wgfleet_proto::hmac_auth;
use wgfleet_proto::wire::{
    AddPeerRequest, EnableDisableResponse, HealthResponse, InterfaceConfigRequest,
    InterfaceConfigResponse, StatusResponse, SyncConfRequest, UpdatePeerRequest, WgDumpResponse,
};

use crate::error::CoreError;

#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    secret: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            base_url: base_url.into(),
            secret: secret.into(),
            http,
        }
    }

    fn unix_now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string()
    }

    async fn request<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, CoreError> {
        let body_str = match body {
            Some(b) => serde_json::to_string(b).map_err(|e| CoreError::Internal(e.to_string()))?,
            None => String::new(),
        };
        let timestamp = Self::unix_now();
        let signature = hmac_auth::sign(&self.secret, method.as_str(), path, &body_str, &timestamp);

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header(hmac_auth::TIMESTAMP_HEADER, &timestamp)
            .header(hmac_auth::SIGNATURE_HEADER, &signature);
        if body.is_some() {
            req = req
                .header("content-type", "application/json")
                .body(body_str);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::AgentUnreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .text()
                .await
                .unwrap_or_else(|_| status.to_string());
            return Err(CoreError::AgentError(format!("{status}: {detail}")));
        }

        resp.json::<R>()
            .await
            .map_err(|e| CoreError::AgentError(format!("invalid response body: {e}")))
    }

    /// Like `request`, but for calls whose success response carries no body
    /// (the Agent's 201/204 peer mutation endpoints).
    async fn request_unit<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), CoreError> {
        let body_str = match body {
            Some(b) => serde_json::to_string(b).map_err(|e| CoreError::Internal(e.to_string()))?,
            None => String::new(),
        };
        let timestamp = Self::unix_now();
        let signature = hmac_auth::sign(&self.secret, method.as_str(), path, &body_str, &timestamp);

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header(hmac_auth::TIMESTAMP_HEADER, &timestamp)
            .header(hmac_auth::SIGNATURE_HEADER, &signature);
        if body.is_some() {
            req = req
                .header("content-type", "application/json")
                .body(body_str);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::AgentUnreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_else(|_| status.to_string());
            return Err(CoreError::AgentError(format!("{status}: {detail}")));
        }
        Ok(())
    }

    async fn request_no_body_response(
        &self,
        method: Method,
        path: &str,
    ) -> Result<(), CoreError> {
        self.request_unit::<()>(method, path, None).await
    }

    pub async fn health(&self) -> Result<HealthResponse, CoreError> {
        self.request::<(), _>(Method::GET, "/health", None).await
    }

    /// Synchronous probe used by `POST /api/nodes/{id}/test`.
    pub async fn test_connection(&self) -> bool {
        self.health().await.is_ok()
    }

    pub async fn status(&self) -> Result<StatusResponse, CoreError> {
        self.request::<(), _>(Method::GET, "/v1/status", None).await
    }

    pub async fn dump(&self, interface: &str) -> Result<WgDumpResponse, CoreError> {
        let path = format!("/v1/wg/{interface}/dump");
        self.request::<(), _>(Method::GET, &path, None).await
    }

    pub async fn add_peer(
        &self,
        interface: &str,
        req: &AddPeerRequest,
    ) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}/peers");
        self.request_unit(Method::POST, &path, Some(req)).await
    }

    pub async fn update_peer(
        &self,
        interface: &str,
        public_key: &str,
        req: &UpdatePeerRequest,
    ) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}/peers/{public_key}");
        self.request_unit(Method::PUT, &path, Some(req)).await
    }

    pub async fn delete_peer(&self, interface: &str, public_key: &str) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}/peers/{public_key}");
        self.request_no_body_response(Method::DELETE, &path).await
    }

    pub async fn syncconf(&self, interface: &str, config_base64: &str) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}/syncconf");
        let body = SyncConfRequest {
            config: config_base64.to_string(),
        };
        self.request_unit(Method::POST, &path, Some(&body)).await
    }

    pub async fn get_config(&self, interface: &str) -> Result<InterfaceConfigResponse, CoreError> {
        let path = format!("/v1/wg/{interface}/config");
        self.request::<(), _>(Method::GET, &path, None).await
    }

    pub async fn put_config(
        &self,
        interface: &str,
        req: &InterfaceConfigRequest,
    ) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}/config");
        self.request_unit(Method::PUT, &path, Some(req)).await
    }

    pub async fn enable(&self, interface: &str) -> Result<EnableDisableResponse, CoreError> {
        let path = format!("/v1/wg/{interface}/enable");
        self.request::<(), _>(Method::POST, &path, None).await
    }

    pub async fn disable(&self, interface: &str) -> Result<EnableDisableResponse, CoreError> {
        let path = format!("/v1/wg/{interface}/disable");
        self.request::<(), _>(Method::POST, &path, None).await
    }

    pub async fn delete_interface(&self, interface: &str) -> Result<(), CoreError> {
        let path = format!("/v1/wg/{interface}");
        self.request_no_body_response(Method::DELETE, &path).await
    }
}

/// Builds per-node clients from stored credentials rather than holding one
/// client open per node indefinitely.
#[derive(Clone)]
pub struct AgentClientFactory {
    timeout: Duration,
}

impl AgentClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn for_node(&self, agent_url: &str, shared_secret: &str) -> AgentClient {
        AgentClient::new(agent_url, shared_secret, self.timeout)
    }
}
