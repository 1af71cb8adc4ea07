//! `HtmlAudioElement` backend and Media Session glue for the browser build.

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use js_sys::{Function, Object, Reflect};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{window, AnalyserNode, AudioContext, HtmlAudioElement};

use super::media::{known_duration, MediaBackend, MediaElement, MediaEvent, MediaSink};
use super::visualizer::SpectrumSource;
use crate::config::playback::AUDIO_ELEMENT_ID;
use crate::config::visualizer::FFT_SIZE;
use crate::error::{MediaError, PlayError};

const LISTENED_EVENTS: &[&str] = &[
    "timeupdate",
    "loadedmetadata",
    "playing",
    "pause",
    "ended",
    "error",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct WebMediaBackend;

impl MediaBackend for WebMediaBackend {
    fn open(&self, src: &str, sink: MediaSink) -> Result<Rc<dyn MediaElement>, MediaError> {
        let audio = create_audio_element()
            .ok_or_else(|| MediaError::Unavailable("cannot create <audio>".into()))?;
        let element = Rc::new(WebAudio {
            audio: audio.clone(),
            listeners: RefCell::new(Vec::new()),
            analyser: RefCell::new(None),
        });

        for name in LISTENED_EVENTS {
            let sink = sink.clone();
            let source = audio.clone();
            let name_owned = *name;
            let callback = Closure::wrap(Box::new(move || {
                let event = match name_owned {
                    "timeupdate" => MediaEvent::TimeUpdate,
                    "loadedmetadata" => MediaEvent::LoadedMetadata,
                    "playing" => MediaEvent::Playing,
                    "pause" => MediaEvent::Pause,
                    "ended" => MediaEvent::Ended,
                    _ => MediaEvent::Error(
                        source
                            .error()
                            .map(|err| MediaError::from_code(err.code()))
                            .unwrap_or_else(|| MediaError::Unavailable("unknown".into())),
                    ),
                };
                sink(event);
            }) as Box<dyn FnMut()>);
            audio
                .add_event_listener_with_callback(name, callback.as_ref().unchecked_ref())
                .map_err(|e| MediaError::Unavailable(format!("{e:?}")))?;
            element.listeners.borrow_mut().push((name, callback));
        }

        audio.set_src(src);
        Ok(element)
    }
}

/// A fresh hidden `<audio>` appended to the body, replacing any previous one.
fn create_audio_element() -> Option<HtmlAudioElement> {
    let document = window()?.document()?;
    if let Some(existing) = document.get_element_by_id(AUDIO_ELEMENT_ID) {
        existing.remove();
    }

    let audio: HtmlAudioElement = document.create_element("audio").ok()?.dyn_into().ok()?;
    audio.set_id(AUDIO_ELEMENT_ID);
    audio.set_attribute("preload", "metadata").ok()?;
    document.body()?.append_child(&audio).ok()?;
    Some(audio)
}

struct WebAudio {
    audio: HtmlAudioElement,
    listeners: RefCell<Vec<(&'static str, Closure<dyn FnMut()>)>>,
    analyser: RefCell<Option<(AudioContext, AnalyserNode)>>,
}

impl WebAudio {
    /// Route the element through an analyser. Done lazily, once playback has
    /// started, so a suspended context never silences the element.
    fn ensure_analyser(&self) -> Option<AnalyserNode> {
        if let Some((context, analyser)) = self.analyser.borrow().as_ref() {
            if context.state() == web_sys::AudioContextState::Suspended {
                let _ = context.resume();
            }
            return Some(analyser.clone());
        }

        let context = AudioContext::new().ok()?;
        let source = context.create_media_element_source(&self.audio).ok()?;
        let analyser = context.create_analyser().ok()?;
        analyser.set_fft_size(FFT_SIZE);
        source.connect_with_audio_node(&analyser).ok()?;
        analyser
            .connect_with_audio_node(&context.destination())
            .ok()?;
        *self.analyser.borrow_mut() = Some((context, analyser.clone()));
        Some(analyser)
    }
}

impl SpectrumSource for WebAudio {
    fn frequency_data(&self, bins: &mut Vec<u8>) -> bool {
        if self.audio.paused() {
            return false;
        }
        let Some(analyser) = self.ensure_analyser() else {
            return false;
        };
        bins.resize(analyser.frequency_bin_count() as usize, 0);
        analyser.get_byte_frequency_data(bins);
        true
    }
}

impl MediaElement for WebAudio {
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlayError>> {
        let promise = self.audio.play();
        async move {
            let promise = promise.map_err(play_error)?;
            JsFuture::from(promise).await.map_err(play_error)?;
            Ok(())
        }
        .boxed_local()
    }

    fn pause(&self) {
        let _ = self.audio.pause();
    }

    fn current_time(&self) -> f64 {
        self.audio.current_time()
    }

    fn set_current_time(&self, seconds: f64) {
        self.audio.set_current_time(seconds);
    }

    fn duration(&self) -> Option<f64> {
        known_duration(self.audio.duration())
    }

    fn is_paused(&self) -> bool {
        self.audio.paused()
    }

    fn set_muted(&self, muted: bool) {
        self.audio.set_muted(muted);
    }

    fn set_volume(&self, volume: f64) {
        self.audio.set_volume(volume);
    }

    fn detach(&self) {
        for (name, callback) in self.listeners.borrow_mut().drain(..) {
            let _ = self
                .audio
                .remove_event_listener_with_callback(name, callback.as_ref().unchecked_ref());
        }
        if let Some((context, _)) = self.analyser.borrow_mut().take() {
            let _ = context.close();
        }
        self.audio.remove_attribute("src").ok();
        self.audio.load();
        self.audio.remove();
    }
}

fn js_string(value: &JsValue, key: &str) -> Option<String> {
    Reflect::get(value, &key.into()).ok()?.as_string()
}

fn play_error(err: JsValue) -> PlayError {
    let name = js_string(&err, "name").unwrap_or_default();
    let message = js_string(&err, "message").unwrap_or_else(|| format!("{err:?}"));
    PlayError::from_dom_name(&name, message)
}

fn media_session() -> Option<JsValue> {
    let navigator = window()?.navigator();
    let session = Reflect::get(&navigator, &"mediaSession".into()).ok()?;
    (!session.is_undefined() && !session.is_null()).then_some(session)
}

/// Publish title, playback state and position to `navigator.mediaSession`.
pub fn publish_media_session(title: Option<&str>, playing: bool, position: f64, duration: Option<f64>) {
    let Some(session) = media_session() else {
        return;
    };

    let state = match (title, playing) {
        (None, _) => "none",
        (Some(_), true) => "playing",
        (Some(_), false) => "paused",
    };
    let _ = Reflect::set(&session, &"playbackState".into(), &state.into());

    let metadata = title.and_then(|title| {
        let ctor: Function = Reflect::get(&js_sys::global(), &"MediaMetadata".into())
            .ok()?
            .dyn_into()
            .ok()?;
        let init = Object::new();
        Reflect::set(&init, &"title".into(), &title.into()).ok()?;
        Reflect::construct(&ctor, &js_sys::Array::of1(&init)).ok()
    });
    let _ = Reflect::set(
        &session,
        &"metadata".into(),
        &metadata.unwrap_or(JsValue::NULL),
    );

    let Some(duration) = duration else {
        return;
    };
    let Ok(set_position) = Reflect::get(&session, &"setPositionState".into()) else {
        return;
    };
    let Ok(set_position) = set_position.dyn_into::<Function>() else {
        return;
    };
    let position_state = Object::new();
    let _ = Reflect::set(&position_state, &"duration".into(), &duration.into());
    let _ = Reflect::set(&position_state, &"playbackRate".into(), &1.0.into());
    let _ = Reflect::set(
        &position_state,
        &"position".into(),
        &position.clamp(0.0, duration).into(),
    );
    let _ = set_position.call1(&session, &position_state);
}

/// Map hardware and lock-screen media keys onto the exported player handle.
pub fn install_media_session_actions(skip_seconds: f64) {
    let _ = js_sys::eval(&format!(
        r#"
(() => {{
  if (window.__miniplayerMediaSessionInit) {{
    return true;
  }}
  window.__miniplayerMediaSessionInit = true;
  if (!("mediaSession" in navigator)) {{
    return true;
  }}

  const player = () => window.globalMiniPlayer;
  const bind = (action, handler) => {{
    try {{
      navigator.mediaSession.setActionHandler(action, handler);
    }} catch (_err) {{}}
  }};

  bind("play", () => player() && player().play());
  bind("pause", () => player() && player().pause());
  bind("previoustrack", () => player() && player().seekTo(0));
  bind("seekto", (details) => {{
    if (player() && details && typeof details.seekTime === "number") {{
      player().seekTo(details.seekTime);
    }}
  }});
  bind("seekbackward", (details) => {{
    const step = (details && details.seekOffset) || {skip_seconds};
    if (player()) player().seekTo(player().getCurrentTime() - step);
  }});
  bind("seekforward", (details) => {{
    const step = (details && details.seekOffset) || {skip_seconds};
    if (player()) player().seekTo(player().getCurrentTime() + step);
  }});
  return true;
}})();
"#
    ));
}
