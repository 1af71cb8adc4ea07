//! Widget, playback engine and the continuity controller behind them.

mod app;
pub mod audio_manager;
pub mod continuity;
mod icons;
#[cfg(target_arch = "wasm32")]
pub mod page_furniture;
pub mod player;

pub use app::*;
pub use icons::*;
pub use player::{MiniPlayer, PlayerCommand};
