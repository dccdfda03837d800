use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use super::device_api::DeviceApi;
use super::model::{ConnectParams, ConnectResponse, ScanParams, ScanResponse, StatusResponse};
use crate::error::ApiError;

/// [`DeviceApi`] backed by the backend's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    client: Client,
    base_url: Url,
}

impl HttpDeviceApi {
    /// Creates a client rooted at `base_url`, e.g. `http://localhost:8000/api`.
    ///
    /// ```
    /// let api = devsession::HttpDeviceApi::new("http://localhost:8000/api")?;
    /// assert_eq!("http://localhost:8000/api", api.base_url().as_str());
    /// # Ok::<(), devsession::ApiError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed or cannot carry a path.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let invalid = || ApiError::InvalidBaseUrl {
            url: base_url.to_string(),
        };
        let parsed = Url::parse(base_url.trim_end_matches('/')).map_err(|_error| invalid())?;
        if parsed.cannot_be_a_base() {
            return Err(invalid());
        }

        Ok(Self {
            client: Client::new(),
            base_url: parsed,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidBaseUrl {
                url: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T>(&self, request: RequestBuilder) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "backend responded");

        if !status.is_success() {
            return Err(ApiError::Remote {
                status: status.as_u16(),
                message: extract_error_message(status, &body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    #[instrument(skip(self), level = "debug")]
    async fn scan(&self, params: ScanParams) -> Result<ScanResponse, ApiError> {
        let url = self.endpoint(&["scan"])?;
        self.send(self.client.post(url).json(&params)).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn probe(&self, address: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["device", address])?;
        self.send::<Value>(self.client.get(url)).await.map(|_body| ())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(
        &self,
        address: &str,
        params: ConnectParams,
    ) -> Result<ConnectResponse, ApiError> {
        let url = self.endpoint(&["connect", address])?;
        self.send(self.client.post(url).json(&params)).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(&self) -> Result<StatusResponse, ApiError> {
        let url = self.endpoint(&["disconnect"])?;
        self.send(self.client.post(url)).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn pair(&self, address: &str) -> Result<StatusResponse, ApiError> {
        let url = self.endpoint(&["pair", address])?;
        self.send(self.client.post(url)).await
    }
}

/// Extracts a user-facing message from a failed response.
///
/// Preference order: JSON `detail`, JSON `message`, raw body text, status line.
pub(crate) fn extract_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message"] {
            match object.get(key) {
                Some(Value::String(text)) if !text.trim().is_empty() => return text.clone(),
                Some(Value::Null | Value::String(_)) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }

    let text = body.trim();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        text.to_string()
    }
}
