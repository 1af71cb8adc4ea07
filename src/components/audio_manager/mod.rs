//! Playback engine - owns the single audio element of the page.
//!
//! Keeps audio side-effects out of the component render cycle: the widget
//! only ever sees `EngineState` snapshots and `EngineEvent`s.

mod media;
mod visualizer;
#[cfg(target_arch = "wasm32")]
pub mod web_media;

pub use media::{known_duration, MediaBackend, MediaElement, MediaEvent, MediaSink};
pub use visualizer::{smooth, Bars, NoSpectrum, SpectrumSource, Visualizer};

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::error::{MediaError, PlayError};
use crate::models::Track;

/// What the engine currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub track: Option<Track>,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub is_playing: bool,
    pub volume: f64,
    pub error: Option<MediaError>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            track: None,
            current_time: 0.0,
            duration: None,
            is_playing: false,
            volume: 1.0,
            error: None,
        }
    }
}

/// Observable engine transitions. Emitted on change only.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TimeUpdated(f64),
    MetadataReady(f64),
    Playing,
    Paused,
    Ended,
    Errored(MediaError),
}

/// How a successful `play` got through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStart {
    Direct,
    /// Refused once, then accepted while muted and unmuted right after.
    MutedRetry,
}

type Listener = Rc<dyn Fn(&EngineEvent)>;

struct EngineInner {
    backend: Rc<dyn MediaBackend>,
    element: RefCell<Option<Rc<dyn MediaElement>>>,
    generation: Cell<u64>,
    state: RefCell<EngineState>,
    listeners: RefCell<Vec<Listener>>,
    visualizer: RefCell<Visualizer>,
}

#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Rc<EngineInner>,
}

impl PlaybackEngine {
    pub fn new(backend: Rc<dyn MediaBackend>) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                backend,
                element: RefCell::new(None),
                generation: Cell::new(0),
                state: RefCell::new(EngineState::default()),
                listeners: RefCell::new(Vec::new()),
                visualizer: RefCell::new(Visualizer::default()),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&EngineEvent) + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn state(&self) -> EngineState {
        self.inner.state.borrow().clone()
    }

    pub fn track(&self) -> Option<Track> {
        self.inner.state.borrow().track.clone()
    }

    pub fn has_error(&self) -> bool {
        self.inner.state.borrow().error.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.borrow().is_playing
    }

    /// Playing according to both the engine and the element itself.
    pub fn is_live_playing(&self) -> bool {
        self.is_playing() && self.element().is_some_and(|element| !element.is_paused())
    }

    /// Live element position, falling back to the last reported one.
    pub fn current_time(&self) -> f64 {
        match self.element() {
            Some(element) => element.current_time(),
            None => self.inner.state.borrow().current_time,
        }
    }

    /// Known duration. Picks up metadata the element has but has not announced yet.
    pub fn duration(&self) -> Option<f64> {
        if let Some(duration) = self.inner.state.borrow().duration {
            return Some(duration);
        }
        let duration = self.element()?.duration()?;
        self.inner.state.borrow_mut().duration = Some(duration);
        Some(duration)
    }

    /// Replace the element with a fresh one bound to `track`. Never starts playback.
    pub fn load(&self, track: &Track) -> Result<(), MediaError> {
        self.teardown();
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);

        let volume = {
            let mut state = self.inner.state.borrow_mut();
            let volume = state.volume;
            *state = EngineState {
                track: Some(track.clone()),
                volume,
                ..EngineState::default()
            };
            volume
        };

        let weak = Rc::downgrade(&self.inner);
        let sink: MediaSink = Rc::new(move |event| dispatch(&weak, generation, event));
        match self.inner.backend.open(&track.src, sink) {
            Ok(element) => {
                element.set_volume(volume);
                *self.inner.element.borrow_mut() = Some(element);
                info!(src = %track.src, "loaded track");
                Ok(())
            }
            Err(e) => {
                warn!(src = %track.src, error = %e, "failed to create audio element");
                self.inner.state.borrow_mut().error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Drop the element and forget the track.
    pub fn unload(&self) {
        let was_playing = self.is_playing();
        self.teardown();
        self.inner.generation.set(self.inner.generation.get() + 1);
        let volume = self.inner.state.borrow().volume;
        *self.inner.state.borrow_mut() = EngineState {
            volume,
            ..EngineState::default()
        };
        if was_playing {
            self.emit(EngineEvent::Paused);
        }
    }

    /// Seek to `at` when given, then start playback.
    ///
    /// A permission refusal gets one muted retry; any other failure, or a
    /// second refusal, is reported to the caller and leaves the engine paused.
    pub async fn play(&self, at: Option<f64>) -> Result<PlayStart, PlayError> {
        let element = self.element().ok_or(PlayError::NoSource)?;
        let generation = self.inner.generation.get();
        if let Some(at) = at {
            self.seek(at);
        }

        let first = element.play().await;
        if self.inner.generation.get() != generation {
            return Err(PlayError::Aborted("track replaced during play".into()));
        }
        let err = match first {
            Ok(()) => {
                self.set_playing(true);
                return Ok(PlayStart::Direct);
            }
            Err(err) => err,
        };
        if !err.is_permission() {
            warn!(error = %err, "play() failed");
            self.set_playing(false);
            return Err(err);
        }

        debug!("play() refused, retrying muted");
        element.set_muted(true);
        let retry = element.play().await;
        element.set_muted(false);
        if self.inner.generation.get() != generation {
            return Err(PlayError::Aborted("track replaced during play".into()));
        }
        match retry {
            Ok(()) => {
                self.set_playing(true);
                Ok(PlayStart::MutedRetry)
            }
            Err(retry_err) => {
                debug!(error = %retry_err, "muted retry refused as well");
                self.set_playing(false);
                Err(err)
            }
        }
    }

    pub fn pause(&self) {
        if let Some(element) = self.element() {
            if !element.is_paused() {
                element.pause();
            }
        }
        self.set_playing(false);
    }

    /// Clamp to `[0, duration]` and seek. Returns the applied offset, or
    /// `None` while the duration is unknown.
    pub fn seek(&self, seconds: f64) -> Option<f64> {
        let element = self.element()?;
        let duration = self.duration()?;
        let target = if seconds.is_finite() { seconds } else { 0.0 };
        let target = target.clamp(0.0, duration);
        element.set_current_time(target);
        self.inner.state.borrow_mut().current_time = target;
        Some(target)
    }

    pub fn set_volume(&self, volume: f64) -> f64 {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.inner.state.borrow_mut().volume = volume;
        if let Some(element) = self.element() {
            element.set_volume(volume);
        }
        volume
    }

    /// Next visualizer frame, if one is due.
    pub fn sample_visualizer(&self, now_ms: f64) -> Option<Bars> {
        let element = self.element();
        let mut visualizer = self.inner.visualizer.borrow_mut();
        match element {
            Some(element) => visualizer.frame(now_ms, element.as_ref()),
            None => visualizer.frame(now_ms, &NoSpectrum),
        }
    }

    pub fn stop_visualizer(&self) {
        self.inner.visualizer.borrow_mut().stop();
    }

    /// Restart sampling after the page was hidden, if audio is still flowing.
    pub fn resume_visualizer(&self) -> bool {
        if !self.is_live_playing() {
            return false;
        }
        self.inner.visualizer.borrow_mut().start();
        true
    }

    pub fn visualizer_running(&self) -> bool {
        self.inner.visualizer.borrow().is_running()
    }

    fn element(&self) -> Option<Rc<dyn MediaElement>> {
        self.inner.element.borrow().clone()
    }

    fn teardown(&self) {
        let previous = self.inner.element.borrow_mut().take();
        if let Some(element) = previous {
            element.pause();
            element.detach();
        }
        self.inner.visualizer.borrow_mut().stop();
    }

    fn set_playing(&self, playing: bool) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            let changed = state.is_playing != playing;
            state.is_playing = playing;
            if playing {
                state.error = None;
            }
            changed
        };
        {
            let mut visualizer = self.inner.visualizer.borrow_mut();
            if playing {
                visualizer.start();
            } else {
                visualizer.stop();
            }
        }
        if changed {
            self.emit(if playing {
                EngineEvent::Playing
            } else {
                EngineEvent::Paused
            });
        }
    }

    fn emit(&self, event: EngineEvent) {
        let listeners: Vec<Listener> = self.inner.listeners.borrow().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    fn handle_media_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::TimeUpdate => {
                let Some(element) = self.element() else {
                    return;
                };
                let time = element.current_time();
                self.inner.state.borrow_mut().current_time = time;
                self.emit(EngineEvent::TimeUpdated(time));
            }
            MediaEvent::LoadedMetadata => {
                let Some(duration) = self.element().and_then(|element| element.duration()) else {
                    return;
                };
                self.inner.state.borrow_mut().duration = Some(duration);
                debug!(duration, "metadata ready");
                self.emit(EngineEvent::MetadataReady(duration));
            }
            MediaEvent::Playing => self.set_playing(true),
            MediaEvent::Pause => self.set_playing(false),
            MediaEvent::Ended => {
                {
                    let mut state = self.inner.state.borrow_mut();
                    state.is_playing = false;
                    if let Some(duration) = state.duration {
                        state.current_time = duration;
                    }
                }
                self.inner.visualizer.borrow_mut().stop();
                info!("track ended");
                self.emit(EngineEvent::Ended);
            }
            MediaEvent::Error(err) => {
                {
                    let mut state = self.inner.state.borrow_mut();
                    state.is_playing = false;
                    state.error = Some(err.clone());
                }
                self.inner.visualizer.borrow_mut().stop();
                warn!(error = %err, "audio element error");
                self.emit(EngineEvent::Errored(err));
            }
        }
    }
}

/// Route an element event to the engine, dropping events from replaced elements.
fn dispatch(engine: &Weak<EngineInner>, generation: u64, event: MediaEvent) {
    let Some(inner) = engine.upgrade() else {
        return;
    };
    if inner.generation.get() != generation {
        return;
    }
    PlaybackEngine { inner }.handle_media_event(event);
}
