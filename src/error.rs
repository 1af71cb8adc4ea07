//! Error types for the player
//!
//! Every error is absorbed at the component that can react to it; none of
//! these reach page rendering.

use thiserror::Error;

/// Failures of a storage slot.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded: {0}")]
    Quota(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rejections of `play()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayError {
    /// The browser's autoplay policy refused playback.
    #[error("Playback not allowed: {0}")]
    NotAllowed(String),

    #[error("Playback aborted: {0}")]
    Aborted(String),

    #[error("No track loaded")]
    NoSource,

    #[error("Playback failed: {0}")]
    Failed(String),
}

impl PlayError {
    pub fn is_permission(&self) -> bool {
        matches!(self, PlayError::NotAllowed(_))
    }

    /// Classify a DOMException name as raised by `HTMLMediaElement.play()`.
    pub fn from_dom_name(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match name {
            "NotAllowedError" => PlayError::NotAllowed(message),
            "AbortError" => PlayError::Aborted(message),
            _ => PlayError::Failed(message),
        }
    }
}

/// Asset-level failures of the audio element.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Playback was aborted before the audio loaded")]
    Aborted,

    #[error("Network error while loading this track")]
    Network,

    #[error("Audio playback failed due to a decode error")]
    Decode,

    #[error("No supported source was found for this track")]
    Unsupported,

    #[error("Audio element unavailable: {0}")]
    Unavailable(String),
}

impl MediaError {
    /// Map a `MediaError.code` value.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MediaError::Aborted,
            2 => MediaError::Network,
            3 => MediaError::Decode,
            4 => MediaError::Unsupported,
            other => MediaError::Unavailable(format!("media error code {other}")),
        }
    }
}

/// Coordination channel failures. All of them mean "use storage instead".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Coordination channel unavailable: {0}")]
    Unavailable(String),

    #[error("Coordination channel did not answer in time")]
    Timeout,

    #[error("Coordination channel rejected the request: {0}")]
    Rejected(String),

    #[error("Malformed coordination message: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Protocol(e.to_string())
    }
}
