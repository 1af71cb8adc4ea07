//! Page lifecycle wiring for the browser build.
//!
//! Activation triggers, page-hide saves, the save cadence and the visualizer
//! frame loop all hang off DOM events and `gloo-timers` intervals here.

use std::cell::RefCell;
use std::rc::Rc;

use gloo_timers::callback::Interval;
use tracing::debug;
use wasm_bindgen::{closure::Closure, JsCast};
use wasm_bindgen_futures::spawn_local;
use web_sys::{window, VisibilityState};

use super::{Activation, ContinuityController, ControllerEvent};
use crate::components::audio_manager::web_media::{install_media_session_actions, publish_media_session};
use crate::components::audio_manager::EngineEvent;
use crate::config::page::NAVIGATION_EVENTS;
use crate::config::playback::SKIP_SECONDS;
use crate::config::visualizer::FRAME_INTERVAL_MS;

/// Timers that only run while audio is playing and the page is visible.
#[derive(Default)]
struct PlayingTimers {
    save: Option<Interval>,
    frames: Option<Interval>,
}

/// Run an activation in the background.
pub fn spawn_activation(controller: &ContinuityController, trigger: Activation) {
    let controller = controller.clone();
    spawn_local(async move {
        controller.activate(trigger).await;
    });
}

fn page_visible() -> bool {
    window()
        .and_then(|w| w.document())
        .map(|d| d.visibility_state() == VisibilityState::Visible)
        .unwrap_or(true)
}

fn listen(target: &web_sys::EventTarget, event: &str, handler: impl FnMut() + 'static) {
    let callback = Closure::wrap(Box::new(handler) as Box<dyn FnMut()>);
    let _ = target.add_event_listener_with_callback(event, callback.as_ref().unchecked_ref());
    callback.forget();
}

/// Wire the controller to the page. Call once per page.
pub fn install(controller: &ContinuityController) {
    let Some(win) = window() else {
        return;
    };
    let Some(doc) = win.document() else {
        return;
    };

    let timers = Rc::new(RefCell::new(PlayingTimers::default()));

    {
        let controller = controller.clone();
        let timers = timers.clone();
        listen(&doc, "visibilitychange", move || {
            if page_visible() {
                spawn_activation(&controller, Activation::VisibilityRegained);
                if controller.engine().resume_visualizer() {
                    start_frames(&controller, &timers);
                }
            } else {
                controller.on_page_hide();
                timers.borrow_mut().frames = None;
            }
        });
    }
    {
        let controller = controller.clone();
        listen(&win, "focus", move || {
            spawn_activation(&controller, Activation::Focus);
        });
    }
    for event in NAVIGATION_EVENTS {
        let controller = controller.clone();
        listen(&win, event, move || {
            spawn_activation(&controller, Activation::Navigation);
        });
    }
    for event in ["pagehide", "beforeunload"] {
        let controller = controller.clone();
        let timers = timers.clone();
        listen(&win, event, move || {
            controller.on_page_hide();
            timers.borrow_mut().frames = None;
        });
    }

    // Slow background saves survive navigations that skip unload events.
    let background_controller = controller.clone();
    let background = Interval::new(controller.config().background_save_interval_ms, move || {
        background_controller.tick();
    });
    background.forget();

    {
        let handle = controller.clone();
        let timers = timers.clone();
        controller.subscribe(move |event| match event {
            ControllerEvent::Engine(EngineEvent::Playing) => {
                start_save_interval(&handle, &timers);
                if page_visible() {
                    start_frames(&handle, &timers);
                }
                publish(&handle);
            }
            ControllerEvent::Engine(
                EngineEvent::Paused | EngineEvent::Ended | EngineEvent::Errored(_),
            ) => {
                let mut timers = timers.borrow_mut();
                timers.save = None;
                timers.frames = None;
                drop(timers);
                publish(&handle);
            }
            ControllerEvent::Engine(EngineEvent::MetadataReady(_)) | ControllerEvent::ViewChanged => {
                publish(&handle);
            }
            _ => {}
        });
    }

    {
        let controller = controller.clone();
        let gesture = controller.gesture().clone();
        gesture.arm_listeners(move || {
            if controller.resume_prompt_armed() {
                debug!("first gesture while a resume is pending");
                let controller = controller.clone();
                spawn_local(async move {
                    let _ = controller.accept_resume_prompt().await;
                });
            }
        });
    }

    install_media_session_actions(SKIP_SECONDS);
}

fn start_save_interval(controller: &ContinuityController, timers: &Rc<RefCell<PlayingTimers>>) {
    let mut timers = timers.borrow_mut();
    if timers.save.is_some() {
        return;
    }
    let controller = controller.clone();
    let interval = controller.config().playing_save_interval_ms;
    timers.save = Some(Interval::new(interval, move || controller.tick()));
}

fn start_frames(controller: &ContinuityController, timers: &Rc<RefCell<PlayingTimers>>) {
    let mut timers = timers.borrow_mut();
    if timers.frames.is_some() {
        return;
    }
    let controller = controller.clone();
    timers.frames = Some(Interval::new(FRAME_INTERVAL_MS, move || {
        controller.sample_visualizer();
    }));
}

fn publish(controller: &ContinuityController) {
    let view = controller.view();
    publish_media_session(
        view.track.as_ref().map(|track| track.title.as_str()),
        view.is_playing,
        view.current_time,
        view.duration,
    );
}
