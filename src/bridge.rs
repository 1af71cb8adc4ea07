//! Script-facing facade for page content that drives the player directly.
//!
//! One handle is published under every legacy global name; each method
//! forwards to the page's controller.

use js_sys::{Promise, Reflect};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::window;

use crate::components::continuity::{Activation, ContinuityController};
use crate::models::Track;

/// Global names older page scripts look the player up by.
pub const GLOBAL_NAMES: &[&str] = &[
    "globalMiniPlayer",
    "__globalMiniPlayer",
    "persistentAudioPlayer",
    "globalAudioPlayer",
];

#[wasm_bindgen]
pub struct PlayerHandle {
    controller: ContinuityController,
}

#[wasm_bindgen]
impl PlayerHandle {
    /// Re-run restoration; resolves to whether audio is playing afterwards.
    #[wasm_bindgen(js_name = fastRestore)]
    pub fn fast_restore(&self) -> Promise {
        let controller = self.controller.clone();
        future_to_promise(async move {
            let outcome = controller.activate(Activation::Navigation).await;
            debug!(?outcome, "fast restore");
            Ok(JsValue::from_bool(controller.engine().is_playing()))
        })
    }

    /// Resolves to `true` once playback started.
    pub fn play(&self) -> Promise {
        let controller = self.controller.clone();
        future_to_promise(async move {
            Ok(JsValue::from_bool(controller.play().await.is_ok()))
        })
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    #[wasm_bindgen(js_name = togglePlay)]
    pub fn toggle_play(&self) -> Promise {
        let controller = self.controller.clone();
        future_to_promise(async move {
            if let Err(e) = controller.toggle_play().await {
                debug!(error = %e, "toggle from script failed");
            }
            Ok(JsValue::from_bool(controller.engine().is_playing()))
        })
    }

    /// Resolves to `false` when the source could not be opened.
    #[wasm_bindgen(js_name = loadTrack)]
    pub fn load_track(&self, src: String, title: Option<String>, autoplay: Option<bool>) -> Promise {
        let controller = self.controller.clone();
        let title = title.unwrap_or_else(|| src.clone());
        let track = Track::new(src, title);
        future_to_promise(async move {
            match controller.load_track(track, autoplay.unwrap_or(false)).await {
                Ok(()) => Ok(JsValue::TRUE),
                Err(e) => {
                    warn!(error = %e, "script load failed");
                    Ok(JsValue::FALSE)
                }
            }
        })
    }

    #[wasm_bindgen(js_name = getCurrentTime)]
    pub fn current_time(&self) -> f64 {
        self.controller.engine().current_time()
    }

    /// `NaN` until metadata is known.
    #[wasm_bindgen(js_name = getDuration)]
    pub fn duration(&self) -> f64 {
        self.controller.engine().duration().unwrap_or(f64::NAN)
    }

    #[wasm_bindgen(js_name = isCurrentlyPlaying)]
    pub fn is_currently_playing(&self) -> bool {
        self.controller.engine().is_playing()
    }

    #[wasm_bindgen(js_name = seekTo)]
    pub fn seek_to(&self, seconds: f64) {
        if seconds.is_finite() {
            self.controller.seek(seconds);
        }
    }
}

/// Publish the facade on `window` under every legacy name.
pub fn install_globals(controller: &ContinuityController) {
    let Some(win) = window() else {
        return;
    };
    let handle = JsValue::from(PlayerHandle {
        controller: controller.clone(),
    });
    for name in GLOBAL_NAMES {
        if let Err(e) = Reflect::set(&win, &JsValue::from_str(name), &handle) {
            warn!(name, error = ?e, "failed to publish player global");
        }
    }
}
