//! Configuration constants for the player

use crate::models::Track;

/// Persisted state keys
pub mod storage {
    /// Session-scoped slot, cleared with the tab
    pub const SESSION_KEY: &str = "persistentAudioState";

    /// Durable backup slot
    pub const DURABLE_KEY: &str = "persistentAudioBackup";

    /// Session flag set once the visitor has interacted with the page
    pub const GESTURE_KEY: &str = "userGestureGranted";
}

/// Playback defaults
pub mod playback {
    /// Track auto-loaded on the entry page when nothing was saved
    pub const DEFAULT_TRACK_SRC: &str = "/assets/audio/STUDY_WITH_MIKU-part3.mp3";
    pub const DEFAULT_TRACK_TITLE: &str = "STUDY WITH MIKU - Part 3";

    /// DOM id of the hidden audio element
    pub const AUDIO_ELEMENT_ID: &str = "miniplayer-audio";

    /// Seek step for media-session skip actions (seconds)
    pub const SKIP_SECONDS: f64 = 10.0;

    /// How long restoration waits for metadata before deferring the seek (ms)
    pub const METADATA_WAIT_MS: u32 = 2_500;

    /// Poll step while waiting for metadata (ms)
    pub const METADATA_POLL_MS: u32 = 50;
}

/// Snapshot cadence
pub mod persistence {
    /// Save interval while playing (ms)
    pub const PLAYING_SAVE_INTERVAL_MS: u32 = 1_000;

    /// Background save cadence regardless of play state (ms)
    pub const BACKGROUND_SAVE_INTERVAL_MS: u32 = 5_000;
}

/// Visualizer configuration
pub mod visualizer {
    /// Number of bars in the mini visualizer
    pub const BAR_COUNT: usize = 12;

    /// Frame cap
    pub const FPS: u32 = 30;

    /// Minimum time between frames (ms)
    pub const FRAME_INTERVAL_MS: u32 = 1_000 / FPS;

    /// Exponential smoothing factor (0.0-1.0, higher = snappier)
    pub const SMOOTHING: f32 = 0.7;

    /// Floor for bar height (percent)
    pub const MIN_BAR_HEIGHT: f32 = 4.0;

    /// Analyser FFT window
    pub const FFT_SIZE: u32 = 2048;
}

/// Coordination channel configuration
pub mod channel {
    /// Worker script served from the site root
    pub const WORKER_SCRIPT: &str = "/audio-worker.js";

    /// Worker scope
    pub const WORKER_SCOPE: &str = "/";

    /// Content cache for audio assets
    pub const CACHE_NAME: &str = "audio-cache-v1";

    /// Upper bound on any single request (ms)
    pub const REQUEST_TIMEOUT_MS: u32 = 800;

    /// Upper bound on worker registration at startup (ms)
    pub const CONNECT_TIMEOUT_MS: u32 = 1_500;

    /// Message type broadcast by the worker after every state update
    pub const SYNC_MESSAGE: &str = "AUDIO_STATE_SYNC";
}

/// Page-level policy
pub mod page {
    /// Paths that count as the site's entry page
    pub const ENTRY_PATHS: &[&str] = &["/", "/index.html", ""];

    /// Window events after which a history navigation re-runs restoration
    pub const NAVIGATION_EVENTS: &[&str] = &["pageshow", "popstate"];

    /// Furniture hidden on non-entry pages while the player is visible
    pub const SIDEBAR_SELECTORS: &[&str] = &[
        ".sidebar",
        ".sidebar.sticky",
        ".author__avatar",
        ".author__content",
        ".author__urls-wrapper",
        ".sidebar-item",
    ];
}

/// Values consulted by the controller at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub default_track: Track,
    pub entry_paths: Vec<String>,
    pub playing_save_interval_ms: u32,
    pub background_save_interval_ms: u32,
    pub channel_timeout_ms: u32,
    pub metadata_wait_ms: u32,
    pub metadata_poll_ms: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_track: Track::new(playback::DEFAULT_TRACK_SRC, playback::DEFAULT_TRACK_TITLE),
            entry_paths: page::ENTRY_PATHS.iter().map(|p| p.to_string()).collect(),
            playing_save_interval_ms: persistence::PLAYING_SAVE_INTERVAL_MS,
            background_save_interval_ms: persistence::BACKGROUND_SAVE_INTERVAL_MS,
            channel_timeout_ms: channel::REQUEST_TIMEOUT_MS,
            metadata_wait_ms: playback::METADATA_WAIT_MS,
            metadata_poll_ms: playback::METADATA_POLL_MS,
        }
    }
}

impl PlayerConfig {
    pub fn is_entry_path(&self, path: &str) -> bool {
        self.entry_paths.iter().any(|p| p == path)
    }
}
