//! Backend client for the two game endpoints.

use crate::types::{ApiResponse, FaceImageRequest, IdentifyResponse, PlayerProfileRequest};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub const CREATE_PLAYER_PROFILE: &str = "create-player-profile";
pub const IDENTIFY_PLAYER: &str = "identify-player";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 404: no matching profile.
    #[error("not found")]
    NotFound,
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("transport: {0}")]
    Transport(String),
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

/// The game backend.
pub trait GameApi: Send + Sync {
    /// Register a player from their captured photos.
    fn create_player_profile(
        &self,
        request: &PlayerProfileRequest,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// Identify the player in a base64 image. `Ok(None)` means the server
    /// answered 2xx with an empty body.
    fn identify_player(
        &self,
        image: &str,
    ) -> impl Future<Output = Result<Option<IdentifyResponse>, ApiError>> + Send;
}

/// JSON-over-HTTP implementation of [`GameApi`].
#[derive(Debug, Clone)]
pub struct HttpGameApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGameApi {
    /// Build a client rooted at `base_url`. `timeout` of `None` leaves
    /// requests unbounded.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url =
            Url::parse(&normalized).map_err(|e| ApiError::InvalidBaseUrl(format!("{normalized}: {e}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        tracing::info!(base_url = %base_url, ?timeout, "backend client ready");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidBaseUrl(format!("{}{path}: {e}", self.base_url)))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(StatusCode, Vec<u8>), ApiError> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "POST");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        tracing::debug!(path, status = status.as_u16(), bytes = bytes.len(), "response received");
        Ok((status, bytes.to_vec()))
    }
}

impl GameApi for HttpGameApi {
    async fn create_player_profile(&self, request: &PlayerProfileRequest) -> Result<ApiResponse, ApiError> {
        tracing::info!(
            player_id = %request.player_id,
            images = request.images.len(),
            photos = request.photos.as_ref().map_or(0, Vec::len),
            "creating player profile"
        );
        let (status, body) = self.post(CREATE_PLAYER_PROFILE, request).await?;
        classify_profile_response(status.as_u16(), &body)
    }

    async fn identify_player(&self, image: &str) -> Result<Option<IdentifyResponse>, ApiError> {
        let request = FaceImageRequest {
            image: image.to_string(),
        };
        let (status, body) = self.post(IDENTIFY_PLAYER, &request).await?;
        classify_identify_response(status.as_u16(), &body)
    }
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn classify_status(status: u16) -> Result<(), ApiError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(ApiError::NotFound),
        other => Err(ApiError::Status(other)),
    }
}

/// Map an identify-player status and body to the call result.
pub fn classify_identify_response(status: u16, body: &[u8]) -> Result<Option<IdentifyResponse>, ApiError> {
    classify_status(status)?;
    if is_blank(body) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<IdentifyResponse>>(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Map a create-player-profile status and body to the call result.
///
/// A 2xx with no body counts as success with an empty message.
pub fn classify_profile_response(status: u16, body: &[u8]) -> Result<ApiResponse, ApiError> {
    classify_status(status)?;
    if is_blank(body) {
        return Ok(ApiResponse {
            success: true,
            message: String::new(),
        });
    }
    serde_json::from_slice(body).map_err(|e| ApiError::Decode(e.to_string()))
}
