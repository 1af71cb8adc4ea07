//! Track and snapshot types shared by storage, the coordination channel and
//! the controller.

use serde::{Deserialize, Deserializer, Serialize};

/// An audio resource plus its display title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub src: String,
    pub title: String,
}

impl Track {
    pub fn new(src: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            title: title.into(),
        }
    }

    /// Tracks are identified by their source URL only.
    pub fn same_source(&self, other: &Track) -> bool {
        self.src == other.src
    }
}

fn default_volume() -> f64 {
    1.0
}

/// The unit persisted to storage and exchanged with the coordination channel.
///
/// Older builds of the player wrote `trackInfo`, `currentTime` and `timestamp`;
/// those names are still accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default, alias = "trackInfo")]
    pub track: Option<Track>,
    #[serde(default, alias = "currentTime")]
    pub position_seconds: f64,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub is_minimized: bool,
    #[serde(default, alias = "timestamp")]
    pub saved_at_epoch_ms: i64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            track: None,
            position_seconds: 0.0,
            is_playing: false,
            volume: default_volume(),
            is_minimized: false,
            saved_at_epoch_ms: 0,
        }
    }
}

impl PlaybackState {
    /// Enforce the snapshot invariants on data that came from outside.
    pub fn normalized(mut self) -> Self {
        if !self.position_seconds.is_finite() || self.position_seconds < 0.0 {
            self.position_seconds = 0.0;
        }
        self.volume = if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            default_volume()
        };
        if self.track.is_none() {
            self.is_playing = false;
        }
        self
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    /// Seconds of wall-clock time between the snapshot and `now_ms`, never negative.
    pub fn elapsed_seconds(&self, now_ms: i64) -> f64 {
        (now_ms.saturating_sub(self.saved_at_epoch_ms)).max(0) as f64 / 1000.0
    }

    /// Where the track would be now had it kept playing since the snapshot.
    pub fn resume_offset(&self, now_ms: i64) -> f64 {
        if self.is_playing {
            self.position_seconds + self.elapsed_seconds(now_ms)
        } else {
            self.position_seconds
        }
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial snapshot carried by `UPDATE_STATE`. Absent fields keep the held
/// value; `track: null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackPatch {
    #[serde(
        default,
        alias = "trackInfo",
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub track: Option<Option<Track>>,
    #[serde(default, alias = "currentTime", skip_serializing_if = "Option::is_none")]
    pub position_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_minimized: Option<bool>,
}

impl PlaybackPatch {
    /// A patch that overwrites every field with the given snapshot.
    pub fn from_state(state: &PlaybackState) -> Self {
        Self {
            track: Some(state.track.clone()),
            position_seconds: Some(state.position_seconds),
            is_playing: Some(state.is_playing),
            volume: Some(state.volume),
            is_minimized: Some(state.is_minimized),
        }
    }

    /// A patch that forgets the held track.
    pub fn cleared() -> Self {
        Self {
            track: Some(None),
            position_seconds: Some(0.0),
            is_playing: Some(false),
            ..Self::default()
        }
    }

    /// Merge into `state`, stamping `saved_at_epoch_ms` with `now_ms`.
    pub fn apply_to(self, state: &mut PlaybackState, now_ms: i64) {
        if let Some(track) = self.track {
            state.track = track;
        }
        if let Some(position) = self.position_seconds {
            state.position_seconds = position;
        }
        if let Some(playing) = self.is_playing {
            state.is_playing = playing;
        }
        if let Some(volume) = self.volume {
            state.volume = volume;
        }
        if let Some(minimized) = self.is_minimized {
            state.is_minimized = minimized;
        }
        state.saved_at_epoch_ms = now_ms;
        *state = std::mem::take(state).normalized();
    }
}
