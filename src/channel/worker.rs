//! Service worker entry point.
//!
//! `/audio-worker.js` imports the wasm bundle and calls
//! `start_coordination_worker()`; from then on every page request is answered
//! by a `CoordinationHub` backed by the Cache API.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use js_sys::{Array, JSON};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Cache, CacheStorage, Client, ExtendableEvent, ExtendableMessageEvent, MessagePort, Response,
    ServiceWorkerGlobalScope,
};

use super::hub::{AssetCache, CoordinationHub};
use super::{ChannelRequest, ChannelResponse, SyncMessage};
use crate::config::channel::{CACHE_NAME, SYNC_MESSAGE};

fn js_message(err: JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

fn json_value(value: &impl serde::Serialize) -> Option<JsValue> {
    let text = serde_json::to_string(value).ok()?;
    JSON::parse(&text).ok()
}

/// Cache API storage for audio assets.
struct CacheApiAssets {
    caches: CacheStorage,
    scope: ServiceWorkerGlobalScope,
}

impl AssetCache for CacheApiAssets {
    fn ensure_cached(&self, url: &str) -> LocalBoxFuture<'static, Result<bool, String>> {
        let caches = self.caches.clone();
        let scope = self.scope.clone();
        let url = url.to_string();
        async move {
            let cache: Cache = JsFuture::from(caches.open(CACHE_NAME))
                .await
                .map_err(js_message)?
                .unchecked_into();
            let existing = JsFuture::from(cache.match_with_str(&url))
                .await
                .map_err(js_message)?;
            if !existing.is_undefined() {
                return Ok(false);
            }

            let response: Response = JsFuture::from(scope.fetch_with_str(&url))
                .await
                .map_err(js_message)?
                .unchecked_into();
            if !response.ok() {
                return Err(format!("fetch {url} failed with {}", response.status()));
            }
            JsFuture::from(cache.put_with_str(&url, &response))
                .await
                .map_err(js_message)?;
            Ok(true)
        }
        .boxed_local()
    }
}

#[wasm_bindgen]
pub fn start_coordination_worker() -> Result<(), JsValue> {
    let scope: ServiceWorkerGlobalScope = js_sys::global().dyn_into()?;
    let cache = CacheApiAssets {
        caches: scope.caches()?,
        scope: scope.clone(),
    };
    let hub = Rc::new(CoordinationHub::new(Rc::new(cache)));

    let install_scope = scope.clone();
    let on_install = Closure::wrap(Box::new(move |event: ExtendableEvent| {
        if let Ok(promise) = install_scope.skip_waiting() {
            let _ = event.wait_until(&promise);
        }
    }) as Box<dyn FnMut(ExtendableEvent)>);
    scope.set_oninstall(Some(on_install.as_ref().unchecked_ref()));
    on_install.forget();

    let activate_scope = scope.clone();
    let on_activate = Closure::wrap(Box::new(move |event: ExtendableEvent| {
        let _ = event.wait_until(&activate_scope.clients().claim());
    }) as Box<dyn FnMut(ExtendableEvent)>);
    scope.set_onactivate(Some(on_activate.as_ref().unchecked_ref()));
    on_activate.forget();

    let message_scope = scope.clone();
    let on_message = Closure::wrap(Box::new(move |event: ExtendableMessageEvent| {
        let Some(port) = event.ports().get(0).dyn_into::<MessagePort>().ok() else {
            debug!("ignoring message without reply port");
            return;
        };
        let request = JSON::stringify(&event.data())
            .ok()
            .and_then(|text| text.as_string())
            .ok_or_else(|| "unreadable message".to_string())
            .and_then(|text| {
                serde_json::from_str::<ChannelRequest>(&text).map_err(|e| e.to_string())
            });

        let hub = hub.clone();
        let scope = message_scope.clone();
        spawn_local(async move {
            let (response, broadcast) = match request {
                Ok(request) => {
                    let is_update = matches!(request, ChannelRequest::UpdateState(_));
                    let now_ms = js_sys::Date::now() as i64;
                    (hub.handle(request, now_ms).await, is_update)
                }
                Err(e) => {
                    warn!(error = %e, "malformed coordination request");
                    (ChannelResponse::failed(e), false)
                }
            };
            if let Some(reply) = json_value(&response) {
                let _ = port.post_message(&reply);
            }
            if broadcast {
                broadcast_state(&scope, &hub).await;
            }
        });
    }) as Box<dyn FnMut(ExtendableMessageEvent)>);
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    on_message.forget();

    Ok(())
}

async fn broadcast_state(scope: &ServiceWorkerGlobalScope, hub: &CoordinationHub) {
    let message = SyncMessage {
        kind: SYNC_MESSAGE.to_string(),
        state: hub.snapshot(),
    };
    let Some(payload) = json_value(&message) else {
        return;
    };
    let Ok(clients) = JsFuture::from(scope.clients().match_all()).await else {
        return;
    };
    for client in Array::from(&clients).iter() {
        if let Ok(client) = client.dyn_into::<Client>() {
            let _ = client.post_message(&payload);
        }
    }
}
