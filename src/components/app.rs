use dioxus::prelude::*;

use crate::components::audio_manager::Bars;
use crate::components::continuity::PlayerView;
use crate::components::{MiniPlayer, PlayerCommand};
use crate::config::visualizer::{BAR_COUNT, MIN_BAR_HEIGHT};

#[cfg(target_arch = "wasm32")]
use crate::components::continuity::ContinuityController;

/// Page root: builds the controller once and mounts the widget.
#[component]
pub fn PlayerRoot() -> Element {
    let view = use_signal(PlayerView::default);
    let bars = use_signal::<Bars>(|| [MIN_BAR_HEIGHT; BAR_COUNT]);

    #[cfg(target_arch = "wasm32")]
    let controller = use_hook(move || web::boot(view, bars));

    let on_command = move |command: PlayerCommand| {
        #[cfg(target_arch = "wasm32")]
        web::dispatch(&controller, command);
        #[cfg(not(target_arch = "wasm32"))]
        let _ = command;
    };

    rsx! {
        MiniPlayer { view, bars, on_command }
    }
}

#[cfg(target_arch = "wasm32")]
mod web {
    use std::rc::Rc;

    use dioxus::core::{Runtime as DioxusRuntime, RuntimeGuard};
    use tracing::{debug, info};
    use wasm_bindgen_futures::spawn_local;
    use web_sys::window;

    use super::*;
    use crate::bridge;
    use crate::channel::web::{connect_channel, ServiceWorkerChannel};
    use crate::channel::{ChannelClient, CoordinationChannel};
    use crate::components::audio_manager::web_media::WebMediaBackend;
    use crate::components::audio_manager::PlaybackEngine;
    use crate::components::continuity::{lifecycle, Activation, ControllerEvent};
    use crate::components::page_furniture;
    use crate::config::PlayerConfig;
    use crate::db::SnapshotStore;
    use crate::gesture::GestureTracker;
    use crate::platform::{Runtime, WebRuntime};

    pub(super) fn boot(view: Signal<PlayerView>, bars: Signal<Bars>) -> ContinuityController {
        let runtime: Rc<dyn Runtime> = Rc::new(WebRuntime);
        let config = PlayerConfig::default();
        let store = SnapshotStore::browser();
        let gesture = GestureTracker::new(store.session());
        let engine = PlaybackEngine::new(Rc::new(WebMediaBackend));
        let path = window()
            .and_then(|w| w.location().pathname().ok())
            .unwrap_or_default();
        info!(path = %path, "mini player starting");

        let controller = ContinuityController::new(config, engine, store, gesture, runtime.clone(), path);

        {
            let ui_runtime = DioxusRuntime::current();
            let handle = controller.clone();
            controller.subscribe(move |event| {
                let _guard = RuntimeGuard::new(ui_runtime.clone());
                let (mut view, mut bars) = (view, bars);
                match event {
                    ControllerEvent::Frame(frame) => bars.set(*frame),
                    ControllerEvent::Furniture(signal) => page_furniture::apply(*signal),
                    _ => view.set(handle.view()),
                }
            });
        }

        lifecycle::install(&controller);
        bridge::install_globals(&controller);

        if let Some(channel) = ServiceWorkerChannel::controlled() {
            attach(&controller, &runtime, Rc::new(channel));
        }
        lifecycle::spawn_activation(&controller, Activation::PageLoad);

        {
            let controller = controller.clone();
            spawn_local(async move {
                let Some(channel) = connect_channel(runtime.as_ref()).await else {
                    return;
                };
                if !controller.has_channel() {
                    attach(&controller, &runtime, channel);
                }
            });
        }

        controller
    }

    fn attach(
        controller: &ContinuityController,
        runtime: &Rc<dyn Runtime>,
        channel: Rc<ServiceWorkerChannel>,
    ) {
        let observer = controller.clone();
        channel.listen_for_sync(move |state| {
            if observer.observe_remote_state(state) {
                debug!("widget refreshed from another page");
            }
        });
        let channel: Rc<dyn CoordinationChannel> = channel;
        let timeout = controller.config().channel_timeout_ms;
        controller.attach_channel(ChannelClient::new(channel, runtime.clone(), timeout));
    }

    pub(super) fn dispatch(controller: &ContinuityController, command: PlayerCommand) {
        let controller = controller.clone();
        match command {
            PlayerCommand::TogglePlay => spawn_local(async move {
                if let Err(e) = controller.toggle_play().await {
                    debug!(error = %e, "toggle failed");
                }
            }),
            PlayerCommand::Resume => spawn_local(async move {
                if let Err(e) = controller.accept_resume_prompt().await {
                    debug!(error = %e, "resume failed");
                }
            }),
            PlayerCommand::ToggleMinimize => controller.toggle_minimize(),
            PlayerCommand::Close => controller.close(),
            PlayerCommand::Seek(fraction) => controller.seek_fraction(fraction),
        }
    }
}
