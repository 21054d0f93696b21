use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::model::{Group, Item, RemoteItem};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid item payload: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl ProviderError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ProviderError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::Auth))
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Remote side of a sync pass, addressed by item key.
///
/// Definite negatives ("no such item", "container not found") are reported as
/// `Ok(false)` / `Ok(None)`. `Err` is reserved for failed operations.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn open(&self) -> bool;

    async fn close(&self) -> bool;

    async fn is_ready(&self) -> bool;

    async fn fetch_group_list(&self) -> Result<Vec<Group>, ProviderError>;

    /// Complete remote listing for one pass.
    async fn fetch_item_list(&self) -> Result<Vec<RemoteItem>, ProviderError>;

    async fn fetch_item_info(&self, key: &str) -> Result<Option<RemoteItem>, ProviderError>;

    async fn download_file(&self, key: &str) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Creates the remote item first when none exists for `item.key`.
    async fn upload_file(&self, item: &Item, data: &[u8]) -> Result<bool, ProviderError>;

    async fn delete_file(&self, item: &Item) -> Result<bool, ProviderError>;
}
