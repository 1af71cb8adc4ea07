//! Miniplayer: a floating audio widget that keeps playing across page loads.
//!
//! The continuity core (storage, gesture tracking, coordination channel,
//! playback engine and the restoration state machine) is platform-free and
//! talks to the browser through small traits; the `wasm32` build wires those
//! traits to `web_sys` and mounts the Dioxus widget.

#[cfg(target_arch = "wasm32")]
pub mod bridge;
pub mod channel;
pub mod components;
pub mod config;
pub mod db;
pub mod error;
pub mod gesture;
pub mod models;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

pub use components::audio_manager::{EngineEvent, EngineState, PlaybackEngine};
pub use components::continuity::{Activation, ContinuityController, Phase, RestoreOutcome};
pub use models::{PlaybackState, Track};
