use std::time::Duration;

use plugboard_core::config::ServicePluginConfig;
use plugboard_core::UpstreamError;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Bearer-authenticated JSON client for one third-party service.
pub(crate) struct ServiceClient {
    service: &'static str,
    http: Client,
    base_url: String,
    token: SecretString,
}

impl ServiceClient {
    pub(crate) fn from_config(
        service: &'static str,
        config: &ServicePluginConfig,
    ) -> Result<Self, UpstreamError> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| UpstreamError::MissingCredentials { service: service.to_string() })?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|error| {
            UpstreamError::Network { service: service.to_string(), message: error.to_string() }
        })?;

        Ok(Self {
            service,
            http,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(self.token.expose_secret())
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(self.token.expose_secret())
    }

    /// Sends the request; non-2xx statuses become `UpstreamError::Status`.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, UpstreamError> {
        let response = request.send().await.map_err(|error| self.network(error))?;
        let status = response.status();
        let body = response.text().await.map_err(|error| self.network(error))?;

        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: self.service.to_string(),
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|error| UpstreamError::InvalidResponse {
            service: self.service.to_string(),
            reason: error.to_string(),
        })
    }

    fn network(&self, error: reqwest::Error) -> UpstreamError {
        UpstreamError::Network { service: self.service.to_string(), message: error.to_string() }
    }
}
