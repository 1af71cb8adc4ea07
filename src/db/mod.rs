//! Snapshot persistence over two storage tiers.
//!
//! Every save is written through to a session-scoped slot and a durable
//! backup slot. Loads prefer the session slot and fall back to the backup;
//! anything unreadable counts as "nothing saved".

mod store;

pub use store::{KeyValueStore, MemoryStore};

#[cfg(target_arch = "wasm32")]
pub use store::BrowserStore;

use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::storage::{DURABLE_KEY, SESSION_KEY};
use crate::error::StoreError;
use crate::models::PlaybackState;

/// Which tier a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Session,
    Durable,
}

#[derive(Clone)]
pub struct SnapshotStore {
    session: Option<Rc<dyn KeyValueStore>>,
    durable: Option<Rc<dyn KeyValueStore>>,
}

impl SnapshotStore {
    /// Either tier may be missing; a store with neither simply never finds state.
    pub fn new(
        session: Option<Rc<dyn KeyValueStore>>,
        durable: Option<Rc<dyn KeyValueStore>>,
    ) -> Self {
        Self { session, durable }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn browser() -> Self {
        let session = BrowserStore::session().map(|s| Rc::new(s) as Rc<dyn KeyValueStore>);
        let durable = BrowserStore::local().map(|s| Rc::new(s) as Rc<dyn KeyValueStore>);
        if session.is_none() {
            warn!("sessionStorage unavailable; using durable slot only");
        }
        Self::new(session, durable)
    }

    /// The session tier, shared with the gesture flag.
    pub fn session(&self) -> Option<Rc<dyn KeyValueStore>> {
        self.session.clone()
    }

    /// Write the snapshot to both tiers. Failures are logged, never raised.
    pub fn save(&self, state: &PlaybackState) {
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize playback snapshot");
                return;
            }
        };

        for (tier, slot, key) in self.slots() {
            if let Err(e) = slot.set(key, &json) {
                warn!(?tier, error = %e, "failed to persist playback snapshot");
            }
        }
    }

    pub fn load(&self) -> Option<PlaybackState> {
        self.load_with_tier().map(|(state, _)| state)
    }

    /// Like `load`, also reporting which tier answered.
    pub fn load_with_tier(&self) -> Option<(PlaybackState, Tier)> {
        for (tier, slot, key) in self.slots() {
            match read_slot(slot.as_ref(), key) {
                Ok(Some(state)) => {
                    debug!(?tier, "restored playback snapshot");
                    return Some((state, tier));
                }
                Ok(None) => {}
                Err(e) => warn!(?tier, error = %e, "ignoring unreadable playback snapshot"),
            }
        }
        None
    }

    pub fn clear(&self) {
        for (tier, slot, key) in self.slots() {
            if let Err(e) = slot.remove(key) {
                warn!(?tier, error = %e, "failed to clear playback snapshot");
            }
        }
    }

    fn slots(&self) -> impl Iterator<Item = (Tier, &Rc<dyn KeyValueStore>, &'static str)> {
        let session = self
            .session
            .as_ref()
            .map(|slot| (Tier::Session, slot, SESSION_KEY));
        let durable = self
            .durable
            .as_ref()
            .map(|slot| (Tier::Durable, slot, DURABLE_KEY));
        session.into_iter().chain(durable)
    }
}

fn read_slot(slot: &dyn KeyValueStore, key: &str) -> Result<Option<PlaybackState>, StoreError> {
    let Some(raw) = slot.get(key)? else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let state: PlaybackState = serde_json::from_str(&raw)?;
    Ok(Some(state.normalized()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;

    fn stores() -> (Rc<MemoryStore>, Rc<MemoryStore>, SnapshotStore) {
        let session = Rc::new(MemoryStore::new());
        let durable = Rc::new(MemoryStore::new());
        let store = SnapshotStore::new(
            Some(session.clone() as Rc<dyn KeyValueStore>),
            Some(durable.clone() as Rc<dyn KeyValueStore>),
        );
        (session, durable, store)
    }

    fn sample() -> PlaybackState {
        PlaybackState {
            track: Some(Track::new("/assets/audio/a.mp3", "A")),
            position_seconds: 12.25,
            is_playing: true,
            volume: 0.6,
            is_minimized: true,
            saved_at_epoch_ms: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_save_and_load() {
        let (_, _, store) = stores();
        let state = sample();
        store.save(&state);
        assert_eq!(store.load(), Some(state));
    }

    #[test]
    fn test_save_writes_both_tiers() {
        let (session, durable, store) = stores();
        store.save(&sample());
        assert!(session.contains(SESSION_KEY));
        assert!(durable.contains(DURABLE_KEY));
    }

    #[test]
    fn test_load_prefers_session() {
        let (session, durable, store) = stores();
        let mut older = sample();
        older.position_seconds = 1.0;
        durable.raw_insert(DURABLE_KEY, &serde_json::to_string(&older).unwrap());
        session.raw_insert(SESSION_KEY, &serde_json::to_string(&sample()).unwrap());

        let (state, tier) = store.load_with_tier().unwrap();
        assert_eq!(tier, Tier::Session);
        assert_eq!(state.position_seconds, 12.25);
    }

    #[test]
    fn test_falls_back_to_durable_when_session_missing() {
        let (_, durable, store) = stores();
        durable.raw_insert(DURABLE_KEY, &serde_json::to_string(&sample()).unwrap());
        let (_, tier) = store.load_with_tier().unwrap();
        assert_eq!(tier, Tier::Durable);
    }

    #[test]
    fn test_falls_back_to_durable_when_session_corrupt() {
        let (session, durable, store) = stores();
        session.raw_insert(SESSION_KEY, "{not json");
        durable.raw_insert(DURABLE_KEY, &serde_json::to_string(&sample()).unwrap());
        assert_eq!(store.load(), Some(sample()));
    }

    #[test]
    fn test_both_corrupt_is_absence() {
        let (session, durable, store) = stores();
        session.raw_insert(SESSION_KEY, "garbage");
        durable.raw_insert(DURABLE_KEY, "");
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_quota_errors_are_absorbed() {
        let (session, durable, store) = stores();
        session.fail_writes(true);
        store.save(&sample());
        assert!(!session.contains(SESSION_KEY));
        assert!(durable.contains(DURABLE_KEY));
        assert_eq!(store.load(), Some(sample()));
    }

    #[test]
    fn test_clear_removes_both() {
        let (session, durable, store) = stores();
        store.save(&sample());
        store.clear();
        assert!(!session.contains(SESSION_KEY));
        assert!(!durable.contains(DURABLE_KEY));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_no_tiers_never_finds_state() {
        let store = SnapshotStore::new(None, None);
        store.save(&sample());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_loaded_state_is_normalized() {
        let (session, _, store) = stores();
        session.raw_insert(
            SESSION_KEY,
            r#"{"track":null,"positionSeconds":-5,"isPlaying":true,"volume":2,"savedAtEpochMs":1}"#,
        );
        let state = store.load().unwrap();
        assert!(!state.is_playing);
        assert_eq!(state.position_seconds, 0.0);
        assert_eq!(state.volume, 1.0);
    }
}
