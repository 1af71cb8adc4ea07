//! Page side of the service-worker channel.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use js_sys::{Array, Promise, JSON};
use tracing::{debug, info};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    window, MessageChannel, MessageEvent, MessagePort, RegistrationOptions, ServiceWorkerContainer,
};

use super::{ChannelRequest, ChannelResponse, CoordinationChannel, SyncMessage};
use crate::config::channel::{CONNECT_TIMEOUT_MS, SYNC_MESSAGE, WORKER_SCOPE, WORKER_SCRIPT};
use crate::error::ChannelError;
use crate::models::PlaybackState;
use crate::platform::{with_timeout, Runtime};

fn js_message(err: JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

fn to_js(value: &impl serde::Serialize) -> Result<JsValue, ChannelError> {
    let text = serde_json::to_string(value)?;
    JSON::parse(&text).map_err(|e| ChannelError::Protocol(js_message(e)))
}

fn from_js<T: serde::de::DeserializeOwned>(value: &JsValue) -> Result<T, ChannelError> {
    let text = JSON::stringify(value)
        .map_err(|e| ChannelError::Protocol(js_message(e)))?
        .as_string()
        .ok_or_else(|| ChannelError::Protocol("non-string JSON".into()))?;
    Ok(serde_json::from_str(&text)?)
}

pub struct ServiceWorkerChannel {
    container: ServiceWorkerContainer,
}

impl ServiceWorkerChannel {
    /// Register the worker and wait, bounded, until it is active.
    pub async fn connect(runtime: &dyn Runtime) -> Result<Self, ChannelError> {
        let container = window()
            .ok_or_else(|| ChannelError::Unavailable("no window".into()))?
            .navigator()
            .service_worker();
        if container.is_undefined() {
            return Err(ChannelError::Unavailable("service workers unsupported".into()));
        }

        let options = RegistrationOptions::new();
        options.set_scope(WORKER_SCOPE);
        let registration = container.register_with_options(WORKER_SCRIPT, &options);
        JsFuture::from(registration)
            .await
            .map_err(|e| ChannelError::Unavailable(js_message(e)))?;

        let ready = container
            .ready()
            .map_err(|e| ChannelError::Unavailable(js_message(e)))?;
        with_timeout(runtime, CONNECT_TIMEOUT_MS, JsFuture::from(ready).boxed_local())
            .await
            .ok_or(ChannelError::Timeout)?
            .map_err(|e| ChannelError::Unavailable(js_message(e)))?;

        info!("coordination worker ready");
        Ok(Self { container })
    }

    /// The channel to a worker already controlling this page, without
    /// waiting on registration.
    pub fn controlled() -> Option<Self> {
        let container = window()?.navigator().service_worker();
        if container.is_undefined() {
            return None;
        }
        container.controller()?;
        Some(Self { container })
    }

    /// Deliver worker broadcasts to `on_sync`. Other messages are ignored.
    pub fn listen_for_sync(&self, on_sync: impl Fn(PlaybackState) + 'static) {
        let callback = Closure::wrap(Box::new(move |event: MessageEvent| {
            match from_js::<SyncMessage>(&event.data()) {
                Ok(message) if message.kind == SYNC_MESSAGE => on_sync(message.state.normalized()),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "ignoring worker message"),
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        let _ = self
            .container
            .add_event_listener_with_callback("message", callback.as_ref().unchecked_ref());
        callback.forget();
    }
}

/// Reply side of a request's `MessageChannel`. Closed on drop, so requests
/// abandoned by a timeout release their port and handler too.
struct ReplyPort {
    port: MessagePort,
    _on_reply: Closure<dyn FnMut(MessageEvent)>,
}

impl ReplyPort {
    fn new(port: MessagePort, on_reply: Closure<dyn FnMut(MessageEvent)>) -> Self {
        port.set_onmessage(Some(on_reply.as_ref().unchecked_ref()));
        Self {
            port,
            _on_reply: on_reply,
        }
    }
}

impl Drop for ReplyPort {
    fn drop(&mut self) {
        self.port.set_onmessage(None);
        self.port.close();
    }
}

impl CoordinationChannel for ServiceWorkerChannel {
    fn request(
        &self,
        request: ChannelRequest,
    ) -> LocalBoxFuture<'static, Result<ChannelResponse, ChannelError>> {
        let controller = self.container.controller();
        async move {
            let controller = controller
                .ok_or_else(|| ChannelError::Unavailable("page not controlled yet".into()))?;
            let message = to_js(&request)?;
            let ports = MessageChannel::new().map_err(|e| ChannelError::Unavailable(js_message(e)))?;

            let mut resolver = None;
            let reply = Promise::new(&mut |resolve, _reject| resolver = Some(resolve));
            let resolve = resolver
                .ok_or_else(|| ChannelError::Protocol("promise executor did not run".into()))?;
            let on_reply: Closure<dyn FnMut(MessageEvent)> =
                Closure::once(move |event: MessageEvent| {
                    let _ = resolve.call1(&JsValue::NULL, &event.data());
                });
            let reply_port = ReplyPort::new(ports.port1(), on_reply);

            controller
                .post_message_with_transferable(&message, &Array::of1(&ports.port2()))
                .map_err(|e| ChannelError::Unavailable(js_message(e)))?;

            let data = JsFuture::from(reply)
                .await
                .map_err(|e| ChannelError::Protocol(js_message(e)))?;
            drop(reply_port);
            from_js::<ChannelResponse>(&data)
        }
        .boxed_local()
    }
}

/// Like `connect`, with failures logged and turned into absence.
pub async fn connect_channel(runtime: &dyn Runtime) -> Option<Rc<ServiceWorkerChannel>> {
    match ServiceWorkerChannel::connect(runtime).await {
        Ok(channel) => Some(Rc::new(channel)),
        Err(e) => {
            debug!(error = %e, "coordination channel unavailable");
            None
        }
    }
}
