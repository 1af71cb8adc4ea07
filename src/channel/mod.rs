//! Coordination channel: an origin-wide background worker holding a shared
//! copy of the playback snapshot and a content cache for audio assets.
//!
//! The channel is an optimization. Every request is bounded by a timeout and
//! every failure means "use storage instead".

mod hub;
#[cfg(target_arch = "wasm32")]
pub mod web;
#[cfg(target_arch = "wasm32")]
pub mod worker;

pub use hub::{AssetCache, CoordinationHub, InProcessChannel, MemoryAssetCache};

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChannelError;
use crate::models::{PlaybackPatch, PlaybackState};
use crate::platform::{with_timeout, Runtime};

/// Messages a page sends to the worker, as `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelRequest {
    UpdateState(PlaybackPatch),
    GetState {},
    CacheAsset { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlaybackState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            state: None,
            error: None,
        }
    }

    pub fn with_state(state: PlaybackState) -> Self {
        Self {
            state: Some(state),
            ..Self::ok()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            state: None,
            error: Some(error.into()),
        }
    }
}

/// Broadcast from the worker to every page after a state update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: PlaybackState,
}

/// Transport to the worker. One request, one correlated response.
pub trait CoordinationChannel {
    fn request(
        &self,
        request: ChannelRequest,
    ) -> LocalBoxFuture<'static, Result<ChannelResponse, ChannelError>>;
}

/// Typed, time-bounded access to a `CoordinationChannel`.
#[derive(Clone)]
pub struct ChannelClient {
    channel: Rc<dyn CoordinationChannel>,
    runtime: Rc<dyn Runtime>,
    timeout_ms: u32,
}

impl ChannelClient {
    pub fn new(channel: Rc<dyn CoordinationChannel>, runtime: Rc<dyn Runtime>, timeout_ms: u32) -> Self {
        Self {
            channel,
            runtime,
            timeout_ms,
        }
    }

    pub async fn get_state(&self) -> Result<Option<PlaybackState>, ChannelError> {
        let response = self.send(ChannelRequest::GetState {}).await?;
        Ok(response.state.map(PlaybackState::normalized))
    }

    pub async fn update_state(&self, patch: PlaybackPatch) -> Result<(), ChannelError> {
        self.send(ChannelRequest::UpdateState(patch)).await.map(|_| ())
    }

    pub async fn cache_asset(&self, url: &str) -> Result<(), ChannelError> {
        self.send(ChannelRequest::CacheAsset {
            url: url.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn send(&self, request: ChannelRequest) -> Result<ChannelResponse, ChannelError> {
        let pending = self.channel.request(request);
        let response = with_timeout(self.runtime.as_ref(), self.timeout_ms, pending)
            .await
            .ok_or(ChannelError::Timeout)??;
        if response.success {
            Ok(response)
        } else {
            let reason = response.error.unwrap_or_else(|| "unknown".to_string());
            debug!(%reason, "coordination request rejected");
            Err(ChannelError::Rejected(reason))
        }
    }
}
