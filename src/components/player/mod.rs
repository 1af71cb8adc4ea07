use dioxus::prelude::*;

use crate::components::audio_manager::Bars;
use crate::components::continuity::{PlayerView, Status};
use crate::components::Icon;

pub mod view_model;

use view_model::{bar_styles, slider_fraction, slider_value, time_label, SEEK_STEPS};

/// User intent raised by the widget. The app forwards these to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    TogglePlay,
    ToggleMinimize,
    Close,
    /// Seek to a fraction of the track.
    Seek(f64),
    /// Accept the pending "click to resume" prompt.
    Resume,
}

/// Floating mini player. Renders nothing until a track is assigned.
#[component]
pub fn MiniPlayer(
    view: Signal<PlayerView>,
    bars: Signal<Bars>,
    on_command: EventHandler<PlayerCommand>,
) -> Element {
    let state = view();
    let Some(track) = state.track.clone() else {
        return rsx! {};
    };

    let minimized = state.is_minimized;
    let play_icon = if state.is_playing { "pause" } else { "play" };
    let play_label = if state.is_playing { "Pause" } else { "Play" };
    let status_class = match state.status {
        Status::PlayFailed | Status::LoadFailed => "text-red-400",
        Status::ClickToResume => "text-amber-400",
        Status::Playing => "text-emerald-400",
        _ => "text-zinc-500",
    };
    let (size_icon, size_label) = if minimized {
        ("expand", "Expand")
    } else {
        ("minimize", "Minimize")
    };
    let status_label = state.status.label();
    let times = time_label(state.current_time, state.duration);
    let seek_value = slider_value(state.current_time, state.duration);
    let seek_disabled = state.duration.is_none();
    let styles = bar_styles(&bars());
    let panel_class = if minimized {
        "fixed bottom-4 right-4 z-50 w-56 rounded-xl bg-zinc-950/95 border border-zinc-800 shadow-xl p-2"
    } else {
        "fixed bottom-4 right-4 z-50 w-80 rounded-xl bg-zinc-950/95 border border-zinc-800 shadow-xl p-3"
    };

    let on_seek = move |e: Event<FormData>| {
        if let Some(fraction) = slider_fraction(&e.value()) {
            on_command.call(PlayerCommand::Seek(fraction));
        }
    };

    rsx! {
        div { id: "mini-player", class: "{panel_class}",
            div { class: "flex items-center gap-2",
                button {
                    class: "w-8 h-8 rounded-full bg-emerald-500 hover:bg-emerald-400 text-black flex items-center justify-center shrink-0",
                    title: "{play_label}",
                    onclick: move |_| on_command.call(PlayerCommand::TogglePlay),
                    Icon { name: play_icon.to_string(), class: "w-4 h-4".to_string() }
                }
                div { class: "min-w-0 flex-1",
                    p { class: "text-sm text-white truncate", "{track.title}" }
                    if !minimized {
                        p { class: "text-xs {status_class}", "{status_label}" }
                    }
                }
                div { class: "flex items-end gap-px h-6 w-12 shrink-0",
                    for (index, style) in styles.iter().enumerate() {
                        span {
                            key: "{index}",
                            class: "flex-1 bg-emerald-500/80 rounded-sm",
                            style: "{style}",
                        }
                    }
                }
                button {
                    class: "p-1 text-zinc-400 hover:text-white",
                    title: "{size_label}",
                    onclick: move |_| on_command.call(PlayerCommand::ToggleMinimize),
                    Icon { name: size_icon.to_string(), class: "w-4 h-4".to_string() }
                }
                button {
                    class: "p-1 text-zinc-400 hover:text-white",
                    title: "Close",
                    onclick: move |_| on_command.call(PlayerCommand::Close),
                    Icon { name: "close".to_string(), class: "w-4 h-4".to_string() }
                }
            }
            if !minimized {
                div { class: "flex items-center gap-2 mt-2",
                    input {
                        r#type: "range",
                        min: "0",
                        max: "{SEEK_STEPS}",
                        disabled: seek_disabled,
                        value: seek_value,
                        class: "flex-1 h-1.5 bg-zinc-800 rounded-full appearance-none cursor-pointer accent-emerald-500",
                        oninput: on_seek,
                    }
                    span { class: "text-xs text-zinc-500 whitespace-nowrap",
                        "{times}"
                    }
                }
            }
            if state.resume_prompt {
                button {
                    class: "mt-2 w-full text-xs py-1 rounded-lg bg-amber-500/20 text-amber-300 hover:bg-amber-500/30",
                    onclick: move |_| on_command.call(PlayerCommand::Resume),
                    "Click to resume"
                }
            }
        }
    }
}
