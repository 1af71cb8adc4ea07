//! Test doubles for the platform seams.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::{self, LocalBoxFuture};
use futures_util::task::noop_waker_ref;
use futures_util::FutureExt;

use crate::channel::{ChannelRequest, ChannelResponse, CoordinationChannel};
use crate::components::audio_manager::{
    MediaBackend, MediaElement, MediaEvent, MediaSink, SpectrumSource,
};
use crate::error::{ChannelError, MediaError, PlayError};
use crate::models::PlaybackState;
use crate::platform::Runtime;

/// Poll a future once with a no-op waker.
pub fn poll_once<T>(task: &mut LocalBoxFuture<'_, T>) -> Poll<T> {
    let mut cx = Context::from_waker(noop_waker_ref());
    task.poll_unpin(&mut cx)
}

/// Clock and timers under test control.
///
/// With auto-advance on (the default) a sleep moves the clock forward and
/// completes on its first poll. With it off, sleeps stay pending until
/// `advance` passes their deadline.
pub struct ManualRuntime {
    now: Rc<Cell<i64>>,
    auto_advance: Rc<Cell<bool>>,
    spawned: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
}

impl ManualRuntime {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_ms)),
            auto_advance: Rc::new(Cell::new(true)),
            spawned: RefCell::new(Vec::new()),
        }
    }

    pub fn set_now(&self, now_ms: i64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, ms: i64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.auto_advance.set(enabled);
    }

    /// Poll every spawned task until none makes progress.
    pub fn run_spawned(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.spawned.borrow_mut());
            if tasks.is_empty() {
                return;
            }
            let before = tasks.len();
            let mut pending = Vec::new();
            for mut task in tasks {
                if poll_once(&mut task).is_pending() {
                    pending.push(task);
                }
            }
            let stalled = pending.len() == before && self.spawned.borrow().is_empty();
            self.spawned.borrow_mut().extend(pending);
            if stalled {
                return;
            }
        }
    }

    pub fn spawned_count(&self) -> usize {
        self.spawned.borrow().len()
    }
}

impl Runtime for ManualRuntime {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }

    fn sleep(&self, ms: u32) -> LocalBoxFuture<'static, ()> {
        let now = self.now.clone();
        let auto = self.auto_advance.clone();
        let mut deadline = None;
        future::poll_fn(move |_| {
            let due = *deadline.get_or_insert(now.get() + i64::from(ms));
            if auto.get() && now.get() < due {
                now.set(due);
            }
            if now.get() >= due {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .boxed_local()
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawned.borrow_mut().push(task);
    }
}

/// Scripted audio element.
pub struct FakeElement {
    src: String,
    sink: MediaSink,
    time: Cell<f64>,
    duration: Cell<Option<f64>>,
    paused: Cell<bool>,
    volume: Cell<f64>,
    detached: Cell<bool>,
    calls: RefCell<Vec<String>>,
    play_results: Rc<RefCell<VecDeque<Result<(), PlayError>>>>,
}

impl FakeElement {
    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn play_count(&self) -> usize {
        self.calls.borrow().iter().filter(|c| *c == "play").count()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| c.strip_prefix("seek:"))
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub fn volume(&self) -> f64 {
        self.volume.get()
    }

    pub fn set_time(&self, seconds: f64) {
        self.time.set(seconds);
    }

    pub fn set_duration(&self, duration: Option<f64>) {
        self.duration.set(duration);
    }

    /// Deliver an element event as the browser would.
    pub fn fire(&self, event: MediaEvent) {
        if event == MediaEvent::Pause {
            self.paused.set(true);
        }
        if event == MediaEvent::Playing {
            self.paused.set(false);
        }
        (self.sink)(event);
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl SpectrumSource for FakeElement {
    fn frequency_data(&self, _bins: &mut Vec<u8>) -> bool {
        false
    }
}

impl MediaElement for FakeElement {
    fn play(&self) -> LocalBoxFuture<'static, Result<(), PlayError>> {
        self.record("play".into());
        let result = self.play_results.borrow_mut().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.paused.set(false);
        }
        future::ready(result).boxed_local()
    }

    fn pause(&self) {
        self.record("pause".into());
        self.paused.set(true);
    }

    fn current_time(&self) -> f64 {
        self.time.get()
    }

    fn set_current_time(&self, seconds: f64) {
        self.record(format!("seek:{seconds}"));
        self.time.set(seconds);
    }

    fn duration(&self) -> Option<f64> {
        self.duration.get()
    }

    fn is_paused(&self) -> bool {
        self.paused.get()
    }

    fn set_muted(&self, muted: bool) {
        self.record(format!("muted:{muted}"));
    }

    fn set_volume(&self, volume: f64) {
        self.volume.set(volume);
    }

    fn detach(&self) {
        self.detached.set(true);
    }
}

#[derive(Default)]
pub struct FakeBackend {
    elements: RefCell<Vec<Rc<FakeElement>>>,
    duration_on_open: Cell<Option<f64>>,
    fail_open: Cell<bool>,
    play_results: Rc<RefCell<VecDeque<Result<(), PlayError>>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements opened from now on report this duration straight away.
    pub fn set_duration_on_open(&self, duration: Option<f64>) {
        self.duration_on_open.set(duration);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.set(fail);
    }

    /// Queue the outcome of the next `play()` on any element.
    pub fn script_play(&self, result: Result<(), PlayError>) {
        self.play_results.borrow_mut().push_back(result);
    }

    pub fn open_count(&self) -> usize {
        self.elements.borrow().len()
    }

    pub fn last(&self) -> Rc<FakeElement> {
        self.elements
            .borrow()
            .last()
            .cloned()
            .expect("no element opened")
    }
}

impl MediaBackend for FakeBackend {
    fn open(&self, src: &str, sink: MediaSink) -> Result<Rc<dyn MediaElement>, MediaError> {
        if self.fail_open.get() {
            return Err(MediaError::Unavailable("scripted".into()));
        }
        let element = Rc::new(FakeElement {
            src: src.to_string(),
            sink,
            time: Cell::new(0.0),
            duration: Cell::new(self.duration_on_open.get()),
            paused: Cell::new(true),
            volume: Cell::new(1.0),
            detached: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            play_results: self.play_results.clone(),
        });
        self.elements.borrow_mut().push(element.clone());
        Ok(element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Answer,
    Hang,
    Reject,
    Unavailable,
}

/// Channel answering from a fixed snapshot and recording every request.
pub struct ScriptedChannel {
    state: RefCell<Option<PlaybackState>>,
    mode: Cell<ChannelMode>,
    requests: RefCell<Vec<ChannelRequest>>,
    in_flight: Rc<()>,
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(None),
            mode: Cell::new(ChannelMode::Answer),
            requests: RefCell::new(Vec::new()),
            in_flight: Rc::new(()),
        }
    }

    pub fn set_state(&self, state: Option<PlaybackState>) {
        *self.state.borrow_mut() = state;
    }

    pub fn set_mode(&self, mode: ChannelMode) {
        self.mode.set(mode);
    }

    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.requests.borrow().clone()
    }

    /// Hung requests whose futures are still alive.
    pub fn in_flight(&self) -> usize {
        Rc::strong_count(&self.in_flight) - 1
    }
}

impl CoordinationChannel for ScriptedChannel {
    fn request(
        &self,
        request: ChannelRequest,
    ) -> LocalBoxFuture<'static, Result<ChannelResponse, ChannelError>> {
        self.requests.borrow_mut().push(request.clone());
        let response = match self.mode.get() {
            ChannelMode::Hang => {
                let held = self.in_flight.clone();
                return async move {
                    let _held = held;
                    future::pending().await
                }
                .boxed_local();
            }
            ChannelMode::Reject => Ok(ChannelResponse::failed("scripted")),
            ChannelMode::Unavailable => Err(ChannelError::Unavailable("scripted".into())),
            ChannelMode::Answer => Ok(match request {
                ChannelRequest::GetState {} => ChannelResponse {
                    state: self.state.borrow().clone(),
                    ..ChannelResponse::ok()
                },
                _ => ChannelResponse::ok(),
            }),
        };
        future::ready(response).boxed_local()
    }
}
