//! Worker-side request handling, independent of the service worker globals.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use futures_util::future::{self, LocalBoxFuture};
use futures_util::FutureExt;
use tracing::{debug, warn};

use super::{ChannelRequest, ChannelResponse, CoordinationChannel};
use crate::error::ChannelError;
use crate::models::PlaybackState;
use crate::platform::Runtime;

/// Content cache keyed by URL.
pub trait AssetCache {
    /// Make sure `url` is cached. Resolves to `true` when it had to be fetched.
    fn ensure_cached(&self, url: &str) -> LocalBoxFuture<'static, Result<bool, String>>;
}

/// Holds the shared snapshot. Answers queries; never drives audio.
pub struct CoordinationHub {
    state: RefCell<PlaybackState>,
    cache: Rc<dyn AssetCache>,
}

impl CoordinationHub {
    pub fn new(cache: Rc<dyn AssetCache>) -> Self {
        Self {
            state: RefCell::new(PlaybackState::default()),
            cache,
        }
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub async fn handle(&self, request: ChannelRequest, now_ms: i64) -> ChannelResponse {
        match request {
            ChannelRequest::UpdateState(patch) => {
                patch.apply_to(&mut self.state.borrow_mut(), now_ms);
                ChannelResponse::ok()
            }
            ChannelRequest::GetState {} => ChannelResponse::with_state(self.snapshot()),
            ChannelRequest::CacheAsset { url } => match self.cache.ensure_cached(&url).await {
                Ok(fetched) => {
                    debug!(%url, fetched, "asset cached");
                    ChannelResponse::ok()
                }
                Err(e) => {
                    warn!(%url, error = %e, "failed to cache asset");
                    ChannelResponse::failed(e)
                }
            },
        }
    }
}

/// Cache that only remembers which URLs it was asked for.
#[derive(Debug, Default)]
pub struct MemoryAssetCache {
    urls: RefCell<HashSet<String>>,
}

impl MemoryAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.borrow().contains(url)
    }
}

impl AssetCache for MemoryAssetCache {
    fn ensure_cached(&self, url: &str) -> LocalBoxFuture<'static, Result<bool, String>> {
        if url.is_empty() {
            return future::ready(Err("empty url".to_string())).boxed_local();
        }
        let fetched = self.urls.borrow_mut().insert(url.to_string());
        future::ready(Ok(fetched)).boxed_local()
    }
}

/// A channel served by a hub in the same context. Requests and responses go
/// through their JSON form, exactly as they would over a message port.
pub struct InProcessChannel {
    hub: Rc<CoordinationHub>,
    runtime: Rc<dyn Runtime>,
}

impl InProcessChannel {
    pub fn new(hub: Rc<CoordinationHub>, runtime: Rc<dyn Runtime>) -> Self {
        Self { hub, runtime }
    }
}

impl CoordinationChannel for InProcessChannel {
    fn request(
        &self,
        request: ChannelRequest,
    ) -> LocalBoxFuture<'static, Result<ChannelResponse, ChannelError>> {
        let hub = self.hub.clone();
        let now_ms = self.runtime.now_ms();
        async move {
            let wire = serde_json::to_string(&request)?;
            let request: ChannelRequest = serde_json::from_str(&wire)?;
            let response = hub.handle(request, now_ms).await;
            let wire = serde_json::to_string(&response)?;
            Ok(serde_json::from_str(&wire)?)
        }
        .boxed_local()
    }
}
