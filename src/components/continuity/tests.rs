use std::cell::RefCell;
use std::rc::Rc;
use std::task::Poll;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use super::*;
use crate::channel::{ChannelRequest, ChannelClient};
use crate::components::audio_manager::{MediaEvent, PlaybackEngine};
use crate::config::playback::DEFAULT_TRACK_SRC;
use crate::db::{KeyValueStore, MemoryStore, SnapshotStore};
use crate::testing::{poll_once, ChannelMode, FakeBackend, ManualRuntime, ScriptedChannel};

const NOW: i64 = 1_700_000_000_000;

struct Harness {
    runtime: Rc<ManualRuntime>,
    backend: Rc<FakeBackend>,
    session: Rc<MemoryStore>,
    durable: Rc<MemoryStore>,
    controller: ContinuityController,
    events: Rc<RefCell<Vec<ControllerEvent>>>,
}

fn harness(path: &str) -> Harness {
    let runtime = Rc::new(ManualRuntime::new(NOW));
    let backend = Rc::new(FakeBackend::new());
    backend.set_duration_on_open(Some(300.0));
    let session = Rc::new(MemoryStore::new());
    let durable = Rc::new(MemoryStore::new());
    let store = SnapshotStore::new(
        Some(session.clone() as Rc<dyn KeyValueStore>),
        Some(durable.clone() as Rc<dyn KeyValueStore>),
    );
    let gesture = GestureTracker::new(Some(session.clone() as Rc<dyn KeyValueStore>));
    let engine = PlaybackEngine::new(backend.clone());
    let controller = ContinuityController::new(
        PlayerConfig::default(),
        engine,
        store,
        gesture,
        runtime.clone(),
        path,
    );
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    controller.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    Harness {
        runtime,
        backend,
        session,
        durable,
        controller,
        events,
    }
}

impl Harness {
    fn stores(&self) -> SnapshotStore {
        SnapshotStore::new(
            Some(self.session.clone() as Rc<dyn KeyValueStore>),
            Some(self.durable.clone() as Rc<dyn KeyValueStore>),
        )
    }

    fn save(&self, state: PlaybackState) {
        self.stores().save(&state);
    }

    fn saved(&self) -> Option<PlaybackState> {
        self.stores().load()
    }

    fn grant_gesture(&self) {
        self.controller.gesture().record_gesture();
    }

    fn activate(&self) -> RestoreOutcome {
        self.controller
            .activate(Activation::PageLoad)
            .now_or_never()
            .expect("activation suspended")
    }

    fn attach(&self, channel: Rc<ScriptedChannel>) {
        self.controller
            .attach_channel(ChannelClient::new(channel, self.runtime.clone(), 800));
    }

    fn furniture(&self) -> Vec<FurnitureSignal> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                ControllerEvent::Furniture(signal) => Some(*signal),
                _ => None,
            })
            .collect()
    }
}

fn track_a() -> Track {
    Track::new("/assets/audio/a.mp3", "A")
}

fn snapshot(position: f64, playing: bool, saved_ago_ms: i64) -> PlaybackState {
    PlaybackState {
        track: Some(track_a()),
        position_seconds: position,
        is_playing: playing,
        volume: 0.8,
        is_minimized: false,
        saved_at_epoch_ms: NOW - saved_ago_ms,
    }
}

fn offset_of(outcome: &RestoreOutcome) -> f64 {
    match outcome {
        RestoreOutcome::Resumed { offset, .. }
        | RestoreOutcome::Paused { offset }
        | RestoreOutcome::AwaitingGesture { offset } => *offset,
        other => panic!("no offset in {other:?}"),
    }
}

#[test]
fn test_fresh_session_on_entry_page_loads_default_paused() {
    let h = harness("/");
    let outcome = h.activate();
    assert_eq!(outcome, RestoreOutcome::LoadedDefault);
    assert_eq!(h.backend.last().src(), DEFAULT_TRACK_SRC);
    assert_eq!(h.backend.last().play_count(), 0);
    assert!(!h.controller.engine().is_playing());
    assert!(!h.controller.resume_prompt_armed());
}

#[test]
fn test_fresh_session_elsewhere_stays_idle() {
    let h = harness("/posts/hello/");
    assert_eq!(h.activate(), RestoreOutcome::NothingToRestore);
    assert_eq!(h.backend.open_count(), 0);
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_eq!(h.saved(), None);
}

#[test]
fn test_resume_offset_is_extrapolated() {
    let h = harness("/posts/hello/");
    h.save(snapshot(40.0, true, 5_000));
    h.grant_gesture();

    let outcome = h.activate();
    assert!(matches!(outcome, RestoreOutcome::Resumed { .. }));
    assert!((offset_of(&outcome) - 45.0).abs() <= 0.5);
    assert_eq!(h.backend.last().seeks(), vec![45.0]);
    assert_eq!(h.backend.last().play_count(), 1);
    assert!(h.controller.engine().is_live_playing());
    assert_eq!(h.controller.phase(), Phase::Playing);
}

#[test]
fn test_mid_track_navigation_resumes_same_track() {
    let h = harness("/about/");
    h.save(snapshot(20.0, true, 1_500));
    h.grant_gesture();

    let outcome = h.activate();
    assert!((offset_of(&outcome) - 21.5).abs() <= 0.5);
    assert_eq!(h.controller.engine().track(), Some(track_a()));
    assert_eq!(h.controller.engine().state().volume, 0.8);
    assert_eq!(h.furniture(), vec![FurnitureSignal::Suppress]);
}

#[test]
fn test_paused_snapshot_restores_paused_without_extrapolation() {
    let h = harness("/");
    h.save(snapshot(40.0, false, 60_000));
    h.grant_gesture();

    let outcome = h.activate();
    assert_eq!(outcome, RestoreOutcome::Paused { offset: 40.0 });
    assert_eq!(h.backend.last().play_count(), 0);
    assert_eq!(h.controller.view().status, Status::Paused);
}

#[test]
fn test_without_gesture_waits_for_user() {
    let h = harness("/posts/hello/");
    h.save(snapshot(40.0, true, 5_000));

    let outcome = h.activate();
    assert_eq!(outcome, RestoreOutcome::AwaitingGesture { offset: 45.0 });
    assert_eq!(h.backend.last().play_count(), 0);
    assert!(!h.controller.engine().is_playing());
    assert!(h.controller.resume_prompt_armed());
    assert_eq!(h.controller.view().status, Status::ClickToResume);
    assert!(h
        .events
        .borrow()
        .contains(&ControllerEvent::ResumePrompt(true)));

    let saved = h.saved().unwrap();
    assert!(saved.is_playing);
    assert_eq!(saved.position_seconds, 45.0);
    assert_eq!(saved.saved_at_epoch_ms, NOW);
}

#[test]
fn test_resume_prompt_disarms_after_success() {
    let h = harness("/posts/hello/");
    h.save(snapshot(40.0, true, 5_000));
    h.activate();

    let result = h.controller.accept_resume_prompt().now_or_never().unwrap();
    assert_eq!(result, Ok(PlayStart::Direct));
    assert!(!h.controller.resume_prompt_armed());
    assert!(h.controller.gesture().has_gesture());
    assert!(h.controller.engine().is_live_playing());

    let again = h.controller.accept_resume_prompt().now_or_never().unwrap();
    assert!(again.is_err());
    assert_eq!(h.backend.last().play_count(), 1);
}

#[test]
fn test_failed_resume_keeps_prompt_armed() {
    let h = harness("/posts/hello/");
    h.save(snapshot(40.0, true, 5_000));
    h.activate();
    h.backend.script_play(Err(PlayError::Failed("decode".into())));

    let result = h.controller.accept_resume_prompt().now_or_never().unwrap();
    assert!(result.is_err());
    assert!(h.controller.resume_prompt_armed());
}

#[test]
fn test_refused_autoplay_falls_back_to_prompt() {
    let h = harness("/posts/hello/");
    h.save(snapshot(10.0, true, 0));
    h.grant_gesture();
    h.backend.script_play(Err(PlayError::NotAllowed("policy".into())));
    h.backend.script_play(Err(PlayError::NotAllowed("policy".into())));

    let outcome = h.activate();
    assert_eq!(outcome, RestoreOutcome::AwaitingGesture { offset: 10.0 });
    // direct attempt plus the muted retry
    assert_eq!(h.backend.last().play_count(), 2);
    assert!(h.controller.resume_prompt_armed());
    assert!(!h.controller.engine().is_playing());
}

#[test]
fn test_extrapolation_past_end_is_finished() {
    let h = harness("/posts/hello/");
    h.backend.set_duration_on_open(Some(60.0));
    h.save(snapshot(59.0, true, 10_000));
    h.grant_gesture();

    assert_eq!(h.activate(), RestoreOutcome::Finished);
    let element = h.backend.last();
    assert_eq!(element.seeks(), vec![60.0]);
    assert_eq!(element.play_count(), 0);
    assert!(!h.controller.engine().is_playing());
    assert!(!h.controller.resume_prompt_armed());
}

#[test]
fn test_concurrent_activation_is_superseded() {
    let h = harness("/posts/hello/");
    h.backend.set_duration_on_open(None);
    h.runtime.set_auto_advance(false);
    h.save(snapshot(20.0, true, 0));
    h.grant_gesture();

    let controller = h.controller.clone();
    let mut first: LocalBoxFuture<'_, RestoreOutcome> =
        Box::pin(async move { controller.activate(Activation::PageLoad).await });
    assert!(poll_once(&mut first).is_pending());
    assert!(h.controller.is_restoring());

    let second = h
        .controller
        .activate(Activation::Focus)
        .now_or_never()
        .unwrap();
    assert_eq!(second, RestoreOutcome::Superseded);
    assert_eq!(h.backend.open_count(), 1);

    h.backend.last().set_duration(Some(300.0));
    h.runtime.advance(50);
    let Poll::Ready(outcome) = poll_once(&mut first) else {
        panic!("restoration did not finish");
    };
    assert!(matches!(outcome, RestoreOutcome::Resumed { .. }));
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(h.backend.last().play_count(), 1);
    assert!(!h.controller.is_restoring());
}

fn activate_with_late_metadata(h: &Harness, delay_ms: i64) -> RestoreOutcome {
    h.backend.set_duration_on_open(None);
    h.runtime.set_auto_advance(false);
    let controller = h.controller.clone();
    let mut restore: LocalBoxFuture<'_, RestoreOutcome> =
        Box::pin(async move { controller.activate(Activation::PageLoad).await });
    assert!(poll_once(&mut restore).is_pending());

    h.backend.last().set_duration(Some(300.0));
    h.runtime.advance(delay_ms);
    let Poll::Ready(outcome) = poll_once(&mut restore) else {
        panic!("restoration did not finish");
    };
    outcome
}

#[test]
fn test_resume_offset_counts_metadata_wait() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, true, 0));
    h.grant_gesture();

    let outcome = activate_with_late_metadata(&h, 1_500);
    let RestoreOutcome::Resumed { offset, .. } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert!((offset - 21.5).abs() < 1e-9);
    assert_eq!(h.backend.last().seeks(), vec![21.5]);
}

#[test]
fn test_track_ending_during_metadata_wait_finishes() {
    let h = harness("/posts/hello/");
    h.save(snapshot(299.0, true, 0));
    h.grant_gesture();

    assert_eq!(activate_with_late_metadata(&h, 1_500), RestoreOutcome::Finished);
    assert_eq!(h.backend.last().play_count(), 0);
}

#[test]
fn test_visualizer_resumes_after_page_shown_again() {
    let h = harness("/");
    h.grant_gesture();
    h.save(snapshot(10.0, true, 0));
    assert!(matches!(h.activate(), RestoreOutcome::Resumed { .. }));

    h.controller.on_page_hide();
    assert!(h.controller.sample_visualizer().is_none());

    h.runtime.advance(100);
    assert_eq!(h.activate(), RestoreOutcome::AlreadyPlaying);
    assert!(h.controller.engine().visualizer_running());
    assert!(h.controller.sample_visualizer().is_some());
}

#[test]
fn test_back_to_back_activations_load_once() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, true, 0));
    h.grant_gesture();
    h.activate();
    assert_eq!(h.activate(), RestoreOutcome::AlreadyPlaying);
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(h.backend.last().play_count(), 1);
}

#[test]
fn test_playing_audio_is_never_interrupted() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, true, 0));
    h.grant_gesture();
    h.activate();

    let element = h.backend.last();
    element.set_time(100.0);
    let calls_before = element.calls();
    h.save(snapshot(5.0, true, 0));

    assert_eq!(
        h.controller
            .activate(Activation::VisibilityRegained)
            .now_or_never()
            .unwrap(),
        RestoreOutcome::AlreadyPlaying
    );
    assert_eq!(element.calls(), calls_before);
    assert!(h.controller.engine().current_time() >= 100.0);
}

#[test]
fn test_prompt_is_not_retried_on_reactivation() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, true, 0));
    h.activate();
    h.grant_gesture();

    let outcome = h.activate();
    assert!(matches!(outcome, RestoreOutcome::AwaitingGesture { .. }));
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(h.backend.last().play_count(), 0);
}

#[test]
fn test_guard_released_after_load_failure() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, false, 0));
    h.backend.fail_open(true);
    assert!(matches!(h.activate(), RestoreOutcome::LoadFailed(_)));
    assert!(!h.controller.is_restoring());
    assert_eq!(h.controller.view().status, Status::LoadFailed);

    h.backend.fail_open(false);
    assert_eq!(h.activate(), RestoreOutcome::Paused { offset: 20.0 });
}

#[test]
fn test_channel_snapshot_wins_over_storage() {
    let h = harness("/posts/hello/");
    h.save(snapshot(50.0, false, 0));
    let channel = Rc::new(ScriptedChannel::new());
    channel.set_state(Some(PlaybackState {
        track: Some(Track::new("/b.mp3", "B")),
        position_seconds: 10.0,
        saved_at_epoch_ms: NOW,
        ..PlaybackState::default()
    }));
    h.attach(channel);

    assert_eq!(h.activate(), RestoreOutcome::Paused { offset: 10.0 });
    assert_eq!(h.backend.last().src(), "/b.mp3");
}

#[test]
fn test_hung_channel_falls_back_to_storage() {
    let h = harness("/posts/hello/");
    h.save(snapshot(50.0, false, 0));
    let channel = Rc::new(ScriptedChannel::new());
    channel.set_mode(ChannelMode::Hang);
    h.attach(channel);

    assert_eq!(h.activate(), RestoreOutcome::Paused { offset: 50.0 });
    assert_eq!(h.backend.last().src(), track_a().src);
}

#[test]
fn test_trackless_channel_falls_back_to_storage() {
    let h = harness("/posts/hello/");
    h.save(snapshot(50.0, false, 0));
    let channel = Rc::new(ScriptedChannel::new());
    channel.set_state(Some(PlaybackState::default()));
    h.attach(channel.clone());

    assert_eq!(h.activate(), RestoreOutcome::Paused { offset: 50.0 });
}

#[test]
fn test_load_requests_asset_caching_and_pushes_state() {
    let h = harness("/posts/hello/");
    h.save(snapshot(50.0, false, 0));
    let channel = Rc::new(ScriptedChannel::new());
    h.attach(channel.clone());
    h.activate();
    h.runtime.run_spawned();

    let requests = channel.requests();
    assert!(requests.contains(&ChannelRequest::CacheAsset {
        url: track_a().src
    }));
    assert!(requests
        .iter()
        .any(|r| matches!(r, ChannelRequest::UpdateState(_))));
}

#[test]
fn test_play_pause_transitions_are_saved() {
    let h = harness("/");
    h.activate();
    h.controller.play().now_or_never().unwrap().unwrap();
    assert!(h.saved().unwrap().is_playing);

    h.runtime.advance(3_000);
    h.controller.pause();
    let saved = h.saved().unwrap();
    assert!(!saved.is_playing);
    assert_eq!(saved.saved_at_epoch_ms, NOW + 3_000);
    assert!(!h.controller.engine().visualizer_running());
}

#[test]
fn test_tick_cadence_follows_play_state() {
    let h = harness("/");
    h.activate();
    h.controller.play().now_or_never().unwrap().unwrap();
    let stamp = |h: &Harness| h.saved().unwrap().saved_at_epoch_ms;

    h.runtime.advance(999);
    h.controller.tick();
    assert_eq!(stamp(&h), NOW);
    h.runtime.advance(1);
    h.controller.tick();
    assert_eq!(stamp(&h), NOW + 1_000);

    h.controller.pause();
    h.runtime.advance(4_000);
    h.controller.tick();
    assert_eq!(stamp(&h), NOW + 1_000);
    h.runtime.advance(1_000);
    h.controller.tick();
    assert_eq!(stamp(&h), NOW + 6_000);
}

#[test]
fn test_page_hide_saves_and_stops_visualizer() {
    let h = harness("/");
    h.activate();
    h.controller.play().now_or_never().unwrap().unwrap();
    assert!(h.controller.sample_visualizer().is_some());

    h.backend.last().set_time(12.0);
    h.runtime.advance(200);
    h.controller.on_page_hide();
    let saved = h.saved().unwrap();
    assert_eq!(saved.position_seconds, 12.0);
    assert_eq!(saved.saved_at_epoch_ms, NOW + 200);
    assert!(!h.controller.engine().visualizer_running());
}

#[test]
fn test_seek_waits_for_metadata() {
    let h = harness("/posts/hello/");
    h.backend.set_duration_on_open(None);
    h.save(snapshot(30.0, false, 0));

    assert_eq!(h.activate(), RestoreOutcome::Paused { offset: 30.0 });
    assert!(h.backend.last().seeks().is_empty());
    assert_eq!(h.saved().unwrap().position_seconds, 30.0);

    let element = h.backend.last();
    element.set_duration(Some(200.0));
    element.fire(MediaEvent::LoadedMetadata);
    assert_eq!(element.seeks(), vec![30.0]);
    assert_eq!(h.controller.phase(), Phase::ReadyPaused);
}

#[test]
fn test_seek_fraction_uses_duration() {
    let h = harness("/");
    h.activate();
    h.controller.seek_fraction(0.5);
    assert_eq!(h.backend.last().seeks(), vec![150.0]);
    assert_eq!(h.saved().unwrap().position_seconds, 150.0);
}

#[test]
fn test_close_forgets_everything() {
    let h = harness("/posts/hello/");
    h.save(snapshot(20.0, true, 0));
    h.grant_gesture();
    let channel = Rc::new(ScriptedChannel::new());
    h.attach(channel.clone());
    h.activate();

    h.controller.close();
    h.runtime.run_spawned();
    assert_eq!(h.saved(), None);
    assert_eq!(h.controller.engine().track(), None);
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_eq!(
        h.furniture(),
        vec![FurnitureSignal::Suppress, FurnitureSignal::Restore]
    );
    assert!(h.controller.view().track.is_none());
    assert_eq!(
        channel.requests().last(),
        Some(&ChannelRequest::UpdateState(PlaybackPatch::cleared()))
    );
}

#[test]
fn test_load_track_same_source_does_not_reload() {
    let h = harness("/posts/hello/");
    h.controller
        .load_track(track_a(), false)
        .now_or_never()
        .unwrap()
        .unwrap();
    h.controller
        .load_track(track_a(), false)
        .now_or_never()
        .unwrap()
        .unwrap();
    assert_eq!(h.backend.open_count(), 1);
    assert_eq!(h.saved().unwrap().track, Some(track_a()));
}

#[test]
fn test_load_track_autoplay_without_permission_arms_prompt() {
    let h = harness("/posts/hello/");
    h.backend.script_play(Err(PlayError::NotAllowed("policy".into())));
    h.backend.script_play(Err(PlayError::NotAllowed("policy".into())));
    h.controller
        .load_track(track_a(), true)
        .now_or_never()
        .unwrap()
        .unwrap();
    assert!(h.controller.resume_prompt_armed());
}

#[test]
fn test_minimize_is_persisted_and_restored() {
    let h = harness("/");
    h.activate();
    h.controller.toggle_minimize();
    assert!(h.saved().unwrap().is_minimized);

    let next = harness("/");
    next.save(h.saved().unwrap());
    next.activate();
    assert!(next.controller.view().is_minimized);
}

#[test]
fn test_ended_track_stays_loaded() {
    let h = harness("/");
    h.activate();
    h.controller.play().now_or_never().unwrap().unwrap();
    h.backend.last().fire(MediaEvent::Ended);
    assert_eq!(h.controller.phase(), Phase::ReadyPaused);
    assert!(!h.saved().unwrap().is_playing);
    assert_eq!(h.backend.open_count(), 1);
}

#[test]
fn test_remote_state_never_drives_audio() {
    let h = harness("/");
    h.activate();
    h.controller.play().now_or_never().unwrap().unwrap();
    let remote = PlaybackState {
        is_minimized: true,
        ..snapshot(3.0, false, 0)
    };
    assert!(!h.controller.observe_remote_state(remote));
    assert!(h.controller.engine().is_playing());
}

#[test]
fn test_remote_state_refreshes_idle_widget() {
    let h = harness("/posts/hello/");
    h.save(snapshot(3.0, false, 0));
    h.activate();
    let remote = PlaybackState {
        is_minimized: true,
        ..snapshot(3.0, false, 0)
    };
    assert!(h.controller.observe_remote_state(remote));
    assert!(h.controller.view().is_minimized);
    assert!(h.backend.last().seeks().iter().all(|s| *s == 3.0));
}

#[test]
fn test_status_labels() {
    assert_eq!(Status::Loading.label(), "Loading...");
    assert_eq!(Status::ClickToResume.label(), "Click to resume");
    assert_eq!(Status::LoadFailed.label(), "Load failed");
}
