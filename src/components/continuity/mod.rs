//! Continuity controller - restores playback after every page activation and
//! keeps the persisted snapshot current.
//!
//! One controller exists per page. It is the only writer of engine state
//! derived from a snapshot; the widget and the legacy facade only send it
//! commands.

#[cfg(target_arch = "wasm32")]
pub mod lifecycle;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use crate::channel::ChannelClient;
use crate::components::audio_manager::{Bars, EngineEvent, PlayStart, PlaybackEngine};
use crate::config::PlayerConfig;
use crate::db::SnapshotStore;
use crate::error::{MediaError, PlayError};
use crate::gesture::GestureTracker;
use crate::models::{PlaybackPatch, PlaybackState, Track};
use crate::platform::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No track.
    Idle,
    /// Track assigned, metadata not ready yet.
    Loading,
    ReadyPaused,
    Playing,
}

/// What caused an activation. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    PageLoad,
    VisibilityRegained,
    Focus,
    Navigation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Another restoration was already running.
    Superseded,
    /// Audio was flowing; nothing touched.
    AlreadyPlaying,
    /// No snapshot and not on an entry page.
    NothingToRestore,
    /// No snapshot, default track loaded paused.
    LoadedDefault,
    /// Playback resumed at `offset`.
    Resumed { offset: f64, start: PlayStart },
    /// Track restored paused at `offset`.
    Paused { offset: f64 },
    /// Playback intent restored, waiting for the user to resume.
    AwaitingGesture { offset: f64 },
    /// The extrapolated offset ran past the end of the track.
    Finished,
    LoadFailed(MediaError),
}

/// Side-effect requests for the page around the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FurnitureSignal {
    Suppress,
    Restore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Engine(EngineEvent),
    ResumePrompt(bool),
    Furniture(FurnitureSignal),
    Frame(Bars),
    /// Anything else the widget shows changed.
    ViewChanged,
}

/// Text shown under the title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Loading,
    Playing,
    Paused,
    PlayFailed,
    ClickToResume,
    LoadFailed,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Ready => "Ready",
            Status::Loading => "Loading...",
            Status::Playing => "Playing",
            Status::Paused => "Paused",
            Status::PlayFailed => "Play failed",
            Status::ClickToResume => "Click to resume",
            Status::LoadFailed => "Load failed",
        }
    }
}

/// Everything the widget renders.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerView {
    pub track: Option<Track>,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub is_playing: bool,
    pub volume: f64,
    pub is_minimized: bool,
    pub resume_prompt: bool,
    pub status: Status,
}

impl Default for PlayerView {
    fn default() -> Self {
        Self {
            track: None,
            current_time: 0.0,
            duration: None,
            is_playing: false,
            volume: 1.0,
            is_minimized: false,
            resume_prompt: false,
            status: Status::Ready,
        }
    }
}

type Observer = Rc<dyn Fn(&ControllerEvent)>;

struct Inner {
    config: PlayerConfig,
    engine: PlaybackEngine,
    store: SnapshotStore,
    gesture: Rc<GestureTracker>,
    runtime: Rc<dyn Runtime>,
    channel: RefCell<Option<ChannelClient>>,
    page_path: String,
    restoring: Cell<bool>,
    phase: Cell<Phase>,
    minimized: Cell<bool>,
    resume_prompt: Cell<bool>,
    play_failed: Cell<bool>,
    deferred_seek: Cell<Option<f64>>,
    last_save_ms: Cell<i64>,
    furniture_suppressed: Cell<bool>,
    observers: RefCell<Vec<Observer>>,
}

/// Clears the restoring flag on every exit path.
struct RestoreGuard<'a>(&'a Cell<bool>);

impl<'a> RestoreGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[derive(Clone)]
pub struct ContinuityController {
    inner: Rc<Inner>,
}

impl ContinuityController {
    pub fn new(
        config: PlayerConfig,
        engine: PlaybackEngine,
        store: SnapshotStore,
        gesture: Rc<GestureTracker>,
        runtime: Rc<dyn Runtime>,
        page_path: impl Into<String>,
    ) -> Self {
        let inner = Rc::new(Inner {
            config,
            engine,
            store,
            gesture,
            runtime,
            channel: RefCell::new(None),
            page_path: page_path.into(),
            restoring: Cell::new(false),
            phase: Cell::new(Phase::Idle),
            minimized: Cell::new(false),
            resume_prompt: Cell::new(false),
            play_failed: Cell::new(false),
            deferred_seek: Cell::new(None),
            last_save_ms: Cell::new(0),
            furniture_suppressed: Cell::new(false),
            observers: RefCell::new(Vec::new()),
        });

        let weak: Weak<Inner> = Rc::downgrade(&inner);
        inner.engine.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                ContinuityController { inner }.on_engine_event(event);
            }
        });

        Self { inner }
    }

    /// Use the coordination channel from now on.
    pub fn attach_channel(&self, client: ChannelClient) {
        *self.inner.channel.borrow_mut() = Some(client);
        debug!("coordination channel attached");
    }

    pub fn has_channel(&self) -> bool {
        self.inner.channel.borrow().is_some()
    }

    pub fn subscribe(&self, observer: impl Fn(&ControllerEvent) + 'static) {
        self.inner.observers.borrow_mut().push(Rc::new(observer));
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.inner.engine
    }

    pub fn gesture(&self) -> &Rc<GestureTracker> {
        &self.inner.gesture
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    pub fn is_restoring(&self) -> bool {
        self.inner.restoring.get()
    }

    pub fn resume_prompt_armed(&self) -> bool {
        self.inner.resume_prompt.get()
    }

    pub fn is_entry_page(&self) -> bool {
        self.inner.config.is_entry_path(&self.inner.page_path)
    }

    /// Restore playback after a page activation.
    pub async fn activate(&self, trigger: Activation) -> RestoreOutcome {
        let outcome = {
            let Some(_guard) = RestoreGuard::acquire(&self.inner.restoring) else {
                debug!(?trigger, "restoration already running");
                return RestoreOutcome::Superseded;
            };
            if self.inner.engine.is_live_playing() {
                debug!(?trigger, "audio already flowing, skipping restoration");
                self.inner.engine.resume_visualizer();
                return RestoreOutcome::AlreadyPlaying;
            }
            debug!(?trigger, "restoring playback");
            self.restore().await
        };

        if let Some(duration) = self.inner.engine.duration() {
            self.apply_deferred_seek(duration);
        }
        match &outcome {
            RestoreOutcome::NothingToRestore => {}
            RestoreOutcome::LoadFailed(_) => self.notify(ControllerEvent::ViewChanged),
            _ => {
                self.persist();
                self.notify(ControllerEvent::ViewChanged);
            }
        }
        self.sync_furniture();
        info!(?trigger, ?outcome, "restoration finished");
        outcome
    }

    async fn restore(&self) -> RestoreOutcome {
        match self.best_snapshot().await {
            Some(snapshot) if snapshot.has_track() => self.restore_snapshot(snapshot).await,
            _ => self.restore_default(),
        }
    }

    /// Channel first, then storage.
    async fn best_snapshot(&self) -> Option<PlaybackState> {
        let client = self.inner.channel.borrow().clone();
        if let Some(client) = client {
            match client.get_state().await {
                Ok(Some(state)) if state.has_track() => {
                    debug!("snapshot from coordination channel");
                    return Some(state);
                }
                Ok(_) => debug!("coordination channel holds no track"),
                Err(e) => debug!(error = %e, "coordination channel failed, using storage"),
            }
        }
        self.inner.store.load()
    }

    fn restore_default(&self) -> RestoreOutcome {
        if self.inner.engine.track().is_some() {
            return RestoreOutcome::NothingToRestore;
        }
        if !self.is_entry_page() {
            self.inner.phase.set(Phase::Idle);
            return RestoreOutcome::NothingToRestore;
        }
        let track = self.inner.config.default_track.clone();
        match self.load_into_engine(&track) {
            Ok(()) => {
                info!(title = %track.title, "loaded default track");
                RestoreOutcome::LoadedDefault
            }
            Err(e) => RestoreOutcome::LoadFailed(e),
        }
    }

    async fn restore_snapshot(&self, snapshot: PlaybackState) -> RestoreOutcome {
        let inner = &self.inner;
        let Some(track) = snapshot.track.clone() else {
            return RestoreOutcome::NothingToRestore;
        };
        inner.minimized.set(snapshot.is_minimized);
        inner.engine.set_volume(snapshot.volume);

        let reuse = inner
            .engine
            .track()
            .is_some_and(|current| current.same_source(&track))
            && !inner.engine.has_error();

        let target = if reuse {
            let target = inner
                .deferred_seek
                .get()
                .unwrap_or_else(|| inner.engine.current_time());
            if inner.resume_prompt.get() {
                debug!("resume prompt already armed for this track");
                return RestoreOutcome::AwaitingGesture { offset: target };
            }
            target
        } else {
            if let Err(e) = self.load_into_engine(&track) {
                return RestoreOutcome::LoadFailed(e);
            }
            snapshot.resume_offset(inner.runtime.now_ms())
        };

        inner.deferred_seek.set(Some(target));
        let offset = match self.wait_for_metadata().await {
            Some(duration) => {
                inner.deferred_seek.set(None);
                // The clock kept running while metadata loaded.
                let target = if reuse {
                    target
                } else {
                    snapshot.resume_offset(inner.runtime.now_ms())
                };
                if target >= duration {
                    inner.engine.seek(duration);
                    inner.engine.pause();
                    inner.phase.set(Phase::ReadyPaused);
                    info!(target, duration, "snapshot ran past the end of the track");
                    return RestoreOutcome::Finished;
                }
                inner.engine.seek(target).unwrap_or(target)
            }
            None => {
                debug!(target, "metadata not ready, deferring seek");
                target
            }
        };
        if inner.phase.get() == Phase::Loading && inner.engine.duration().is_some() {
            inner.phase.set(Phase::ReadyPaused);
        }

        if !snapshot.is_playing {
            return RestoreOutcome::Paused { offset };
        }
        if inner.gesture.has_gesture() {
            match inner.engine.play(None).await {
                Ok(start) => {
                    inner.play_failed.set(false);
                    inner.phase.set(Phase::Playing);
                    return RestoreOutcome::Resumed { offset, start };
                }
                Err(e) => debug!(error = %e, "autoplay refused during restoration"),
            }
        } else {
            debug!("no gesture yet, waiting for the user");
        }
        self.set_resume_prompt(true);
        RestoreOutcome::AwaitingGesture { offset }
    }

    async fn wait_for_metadata(&self) -> Option<f64> {
        let inner = &self.inner;
        let mut waited = 0;
        loop {
            if let Some(duration) = inner.engine.duration() {
                return Some(duration);
            }
            if inner.engine.has_error() || waited >= inner.config.metadata_wait_ms {
                return None;
            }
            inner.runtime.sleep(inner.config.metadata_poll_ms).await;
            waited += inner.config.metadata_poll_ms;
        }
    }

    fn load_into_engine(&self, track: &Track) -> Result<(), MediaError> {
        let inner = &self.inner;
        inner.deferred_seek.set(None);
        inner.play_failed.set(false);
        self.set_resume_prompt(false);
        if let Err(e) = inner.engine.load(track) {
            inner.phase.set(Phase::Idle);
            return Err(e);
        }
        inner.phase.set(if inner.engine.duration().is_some() {
            Phase::ReadyPaused
        } else {
            Phase::Loading
        });
        self.cache_asset(&track.src);
        Ok(())
    }

    /// Start playback from the current offset. A pending resume prompt is
    /// accepted; with no track the default one is loaded first.
    pub async fn play(&self) -> Result<PlayStart, PlayError> {
        if self.inner.resume_prompt.get() {
            return self.accept_resume_prompt().await;
        }
        if self.inner.engine.track().is_none() {
            let track = self.inner.config.default_track.clone();
            self.load_into_engine(&track)
                .map_err(|e| PlayError::Failed(e.to_string()))?;
        }
        self.start_playback().await
    }

    /// Resume after a refused autoplay. Disarms the prompt on success.
    pub async fn accept_resume_prompt(&self) -> Result<PlayStart, PlayError> {
        if !self.inner.resume_prompt.get() {
            return Err(PlayError::Aborted("no resume pending".into()));
        }
        self.inner.gesture.record_gesture();
        // Taken up front so a second click cannot start a parallel attempt.
        self.set_resume_prompt(false);
        let result = self.start_playback().await;
        if result.is_err() {
            self.set_resume_prompt(true);
        }
        result
    }

    async fn start_playback(&self) -> Result<PlayStart, PlayError> {
        let result = self.inner.engine.play(None).await;
        match &result {
            Ok(_) => {
                self.inner.play_failed.set(false);
                self.inner.phase.set(Phase::Playing);
            }
            Err(e) => {
                warn!(error = %e, "playback could not start");
                self.inner.play_failed.set(true);
            }
        }
        self.persist();
        self.notify(ControllerEvent::ViewChanged);
        result
    }

    pub fn pause(&self) {
        self.inner.engine.pause();
        self.set_resume_prompt(false);
        self.persist();
        self.notify(ControllerEvent::ViewChanged);
    }

    pub async fn toggle_play(&self) -> Result<(), PlayError> {
        if self.inner.engine.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.play().await.map(|_| ())
        }
    }

    /// Seek now, or once metadata arrives.
    pub fn seek(&self, seconds: f64) {
        if self.inner.engine.track().is_none() {
            return;
        }
        if self.inner.engine.seek(seconds).is_none() {
            self.inner.deferred_seek.set(Some(seconds.max(0.0)));
        }
        self.persist();
        self.notify(ControllerEvent::ViewChanged);
    }

    /// Seek to a fraction of the track, as from a click on the progress bar.
    pub fn seek_fraction(&self, fraction: f64) {
        if let Some(duration) = self.inner.engine.duration() {
            self.seek(fraction.clamp(0.0, 1.0) * duration);
        }
    }

    pub fn set_volume(&self, volume: f64) {
        self.inner.engine.set_volume(volume);
        self.persist();
        self.notify(ControllerEvent::ViewChanged);
    }

    pub fn toggle_minimize(&self) {
        let minimized = !self.inner.minimized.get();
        self.inner.minimized.set(minimized);
        self.persist();
        self.notify(ControllerEvent::ViewChanged);
    }

    /// Stop, forget the track everywhere and hide the widget.
    pub fn close(&self) {
        let inner = &self.inner;
        inner.engine.pause();
        inner.engine.unload();
        inner.deferred_seek.set(None);
        inner.play_failed.set(false);
        inner.minimized.set(false);
        inner.phase.set(Phase::Idle);
        self.set_resume_prompt(false);
        inner.store.clear();

        let client = inner.channel.borrow().clone();
        if let Some(client) = client {
            inner.runtime.spawn(Box::pin(async move {
                if let Err(e) = client.update_state(PlaybackPatch::cleared()).await {
                    debug!(error = %e, "failed to clear coordination state");
                }
            }));
        }
        info!("player closed");
        self.sync_furniture();
        self.notify(ControllerEvent::ViewChanged);
    }

    /// Load `track` on behalf of page content, optionally starting it.
    pub async fn load_track(&self, track: Track, autoplay: bool) -> Result<(), MediaError> {
        let engine = &self.inner.engine;
        let already_loaded = engine
            .track()
            .is_some_and(|current| current.same_source(&track))
            && !engine.has_error();
        if !already_loaded {
            self.load_into_engine(&track)?;
        }
        self.persist();
        self.sync_furniture();
        self.notify(ControllerEvent::ViewChanged);
        if autoplay {
            if let Err(e) = self.play().await {
                debug!(error = %e, "autoplay after load refused");
                if e.is_permission() {
                    self.set_resume_prompt(true);
                }
            }
        }
        Ok(())
    }

    /// Save before the page goes away and stop visual work.
    pub fn on_page_hide(&self) {
        self.persist();
        self.inner.engine.stop_visualizer();
    }

    /// Periodic save: fast cadence while playing, slow otherwise.
    pub fn tick(&self) {
        let interval = if self.inner.engine.is_playing() {
            self.inner.config.playing_save_interval_ms
        } else {
            self.inner.config.background_save_interval_ms
        };
        let elapsed = self.inner.runtime.now_ms() - self.inner.last_save_ms.get();
        if elapsed >= i64::from(interval) {
            self.persist();
        }
    }

    /// Next visualizer frame, forwarded to observers.
    pub fn sample_visualizer(&self) -> Option<Bars> {
        let bars = self
            .inner
            .engine
            .sample_visualizer(self.inner.runtime.now_ms() as f64)?;
        self.notify(ControllerEvent::Frame(bars));
        Some(bars)
    }

    /// A snapshot broadcast by the coordination worker. Only refreshes the
    /// widget of an idle page; never drives audio.
    pub fn observe_remote_state(&self, state: PlaybackState) -> bool {
        if self.inner.restoring.get() || self.inner.engine.is_live_playing() {
            return false;
        }
        let same_track = match (self.inner.engine.track(), state.track.as_ref()) {
            (Some(current), Some(remote)) => current.same_source(remote),
            _ => false,
        };
        if !same_track || self.inner.minimized.get() == state.is_minimized {
            return false;
        }
        self.inner.minimized.set(state.is_minimized);
        self.notify(ControllerEvent::ViewChanged);
        true
    }

    /// The snapshot this page would persist right now.
    pub fn snapshot(&self) -> PlaybackState {
        let inner = &self.inner;
        let state = inner.engine.state();
        let position = inner
            .deferred_seek
            .get()
            .unwrap_or_else(|| inner.engine.current_time());
        PlaybackState {
            track: state.track,
            position_seconds: position,
            is_playing: state.is_playing || inner.resume_prompt.get(),
            volume: state.volume,
            is_minimized: inner.minimized.get(),
            saved_at_epoch_ms: inner.runtime.now_ms(),
        }
        .normalized()
    }

    pub fn view(&self) -> PlayerView {
        let inner = &self.inner;
        let state = inner.engine.state();
        let status = if state.error.is_some() {
            Status::LoadFailed
        } else if inner.resume_prompt.get() {
            Status::ClickToResume
        } else if inner.play_failed.get() {
            Status::PlayFailed
        } else if state.is_playing {
            Status::Playing
        } else if inner.phase.get() == Phase::Loading {
            Status::Loading
        } else if state.track.is_some() && inner.engine.current_time() > 0.0 {
            Status::Paused
        } else {
            Status::Ready
        };
        PlayerView {
            current_time: inner.engine.current_time(),
            duration: inner.engine.duration(),
            is_playing: state.is_playing,
            volume: state.volume,
            is_minimized: inner.minimized.get(),
            resume_prompt: inner.resume_prompt.get(),
            track: state.track,
            status,
        }
    }

    /// Write the snapshot to storage and, best effort, to the channel.
    fn persist(&self) {
        let inner = &self.inner;
        if inner.restoring.get() || inner.engine.track().is_none() {
            return;
        }
        let snapshot = self.snapshot();
        inner.store.save(&snapshot);
        inner.last_save_ms.set(snapshot.saved_at_epoch_ms);

        let client = inner.channel.borrow().clone();
        if let Some(client) = client {
            let patch = PlaybackPatch::from_state(&snapshot);
            inner.runtime.spawn(Box::pin(async move {
                if let Err(e) = client.update_state(patch).await {
                    debug!(error = %e, "coordination update failed");
                }
            }));
        }
    }

    fn cache_asset(&self, url: &str) {
        let client = self.inner.channel.borrow().clone();
        let Some(client) = client else {
            return;
        };
        let url = url.to_string();
        self.inner.runtime.spawn(Box::pin(async move {
            if let Err(e) = client.cache_asset(&url).await {
                debug!(%url, error = %e, "asset caching skipped");
            }
        }));
    }

    /// Apply a seek that was requested before the duration was known.
    fn apply_deferred_seek(&self, duration: f64) {
        let Some(target) = self.inner.deferred_seek.take() else {
            return;
        };
        if target >= duration {
            self.inner.engine.seek(duration);
            self.inner.engine.pause();
        } else {
            self.inner.engine.seek(target);
        }
    }

    fn set_resume_prompt(&self, armed: bool) {
        if self.inner.resume_prompt.replace(armed) != armed {
            debug!(armed, "resume prompt");
            self.notify(ControllerEvent::ResumePrompt(armed));
        }
    }

    /// Hide competing sidebars on non-entry pages while a track is shown.
    fn sync_furniture(&self) {
        let suppress = !self.is_entry_page() && self.inner.engine.track().is_some();
        if self.inner.furniture_suppressed.replace(suppress) == suppress {
            return;
        }
        self.notify(ControllerEvent::Furniture(if suppress {
            FurnitureSignal::Suppress
        } else {
            FurnitureSignal::Restore
        }));
    }

    fn on_engine_event(&self, event: &EngineEvent) {
        let inner = &self.inner;
        match event {
            EngineEvent::MetadataReady(duration) => {
                if inner.phase.get() == Phase::Loading {
                    inner.phase.set(Phase::ReadyPaused);
                }
                if !inner.restoring.get() {
                    self.apply_deferred_seek(*duration);
                }
            }
            EngineEvent::Playing => {
                inner.phase.set(Phase::Playing);
                inner.play_failed.set(false);
                self.set_resume_prompt(false);
                self.persist();
            }
            EngineEvent::Paused | EngineEvent::Ended => {
                if inner.engine.track().is_some() {
                    inner.phase.set(Phase::ReadyPaused);
                }
                self.persist();
            }
            EngineEvent::Errored(_) => {
                inner.phase.set(Phase::ReadyPaused);
                self.persist();
            }
            EngineEvent::TimeUpdated(_) => {}
        }
        self.notify(ControllerEvent::Engine(event.clone()));
    }

    fn notify(&self, event: ControllerEvent) {
        let observers: Vec<Observer> = self.inner.observers.borrow().clone();
        for observer in observers {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests;
