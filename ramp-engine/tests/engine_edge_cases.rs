//! Boundary behavior and lifecycle edge cases

mod helpers;

use helpers::*;
use ramp_common::{DiscontinuityReason, PlaybackState, RepeatMode};
use ramp_engine::error::EngineError;
use ramp_engine::message::{MessageTarget, PlayerMessage};
use ramp_engine::timeline::{PeriodDef, Timeline, WindowDef};
use std::any::Any;
use std::sync::Arc;

#[test]
fn test_empty_timeline_stays_buffering() {
    let player = TestPlayer::new();
    let handle = player.prepare(Timeline::empty());

    let events = player.drain_events();
    assert_eq!(latest_state(&events), Some(PlaybackState::Buffering));

    // A refresh that is still empty keeps the engine waiting.
    handle.set_new_timeline(Timeline::empty());
    player.settle();
    player.advance_ms(100);
    let events = player.drain_events();
    assert_ne!(latest_state(&events), Some(PlaybackState::Ended));
    assert_ne!(latest_state(&events), Some(PlaybackState::Idle));

    // A later non-empty refresh starts playback for real.
    handle.set_new_timeline(single_period_timeline(1_000));
    player.settle();
    player.engine.set_play_when_ready(true);
    player.settle();
    player.run_until_state(PlaybackState::Ended, 200);
}

#[test]
fn test_stop_from_empty_timeline_returns_to_idle() {
    let player = TestPlayer::new();
    player.prepare(Timeline::empty());
    player.engine.stop(false);
    player.settle();
    let events = player.drain_events();
    assert_eq!(latest_state(&events), Some(PlaybackState::Idle));
}

#[test]
fn test_seek_past_end_of_window_ends_at_duration() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.settle();

    player.engine.seek_to(Arc::clone(&timeline), 0, 20_000_000);
    player.settle();
    let events = player.run_until_state(PlaybackState::Ended, 50);
    assert_eq!(last_playback_info(&events).unwrap().position_us, 10_000_000);
}

#[test]
fn test_seek_into_dynamic_window_resolves_to_live_edge() {
    let player = TestPlayer::new();
    let timeline = Timeline::new(vec![
        WindowDef::new(vec![PeriodDef::new(60_000_000)]).dynamic(55_000_000)
    ]);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.drain_events();

    player.engine.seek_to(Arc::clone(&timeline), 0, 90_000_000);
    player.settle();
    let events = player.drain_events();
    let info = last_playback_info(&events).unwrap();
    assert_eq!(info.position_us, 55_000_000);
}

#[test]
fn test_stop_without_reset_resumes_from_same_position() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(2_000);

    player.engine.stop(false);
    player.settle();
    let events = player.drain_events();
    assert_eq!(latest_state(&events), Some(PlaybackState::Idle));
    let stopped_position_us = last_playback_info(&events).unwrap().position_us;
    assert!(stopped_position_us >= 2_000_000, "was {stopped_position_us}");

    // Re-prepare without resetting position or state: playback resumes
    // where it stopped.
    let (source, _handle) = FakeMediaSource::new(Arc::clone(&timeline));
    player.engine.prepare(source, false, false);
    player.settle();
    let events = player.run_until_state(PlaybackState::Ready, 50);
    let resumed = last_playback_info(&events).unwrap();
    assert_eq!(resumed.position_us, stopped_position_us);

    let events = player.run_until_state(PlaybackState::Ended, 900);
    assert_eq!(last_playback_info(&events).unwrap().position_us, 10_000_000);
}

#[test]
fn test_repeated_seek_to_same_position_is_acknowledged_once_moved() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.drain_events();

    player.engine.seek_to(Arc::clone(&timeline), 0, 5_000_000);
    player.settle();
    player.engine.seek_to(Arc::clone(&timeline), 0, 5_000_000);
    player.settle();

    let events = player.drain_events();
    let jumps = discontinuities(&events);
    assert_eq!(jumps.len(), 1, "second identical seek is a no-op: {jumps:?}");
    assert_eq!(jumps[0].0, DiscontinuityReason::Seek);
}

#[test]
fn test_repeat_mode_set_twice_produces_no_discontinuity() {
    let player = TestPlayer::new();
    let timeline = multi_window_timeline(&[3_000, 2_000]);
    player.prepare(timeline);
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(100);
    player.drain_events();

    player.engine.set_repeat_mode(RepeatMode::All);
    player.settle();
    player.engine.set_repeat_mode(RepeatMode::All);
    player.settle();
    let events = player.drain_events();
    assert!(discontinuities(&events).is_empty());
}

struct NoopTarget;

impl MessageTarget for NoopTarget {
    fn handle_message(
        &self,
        _message_type: i32,
        _payload: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

#[test]
fn test_message_after_release_is_dropped() {
    let mut player = TestPlayer::new();
    player.prepare(single_period_timeline(10_000));
    player.engine.release();

    let message = PlayerMessage::builder(Arc::new(NoopTarget), 1)
        .at_position(0, 1_000)
        .build();
    player.engine.send_message(message.clone());
    assert!(!message.blocking_await_delivery());
    assert!(message.is_processed());
}

#[test]
fn test_release_is_idempotent() {
    let mut player = TestPlayer::new();
    player.prepare(single_period_timeline(10_000));
    player.engine.release();
    player.engine.release();
}

#[test]
fn test_background_mode_resets_idle_renderers() {
    let player = TestPlayer::new();
    player.prepare(single_period_timeline(10_000));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(100);
    assert!(player.renderer.enables.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    // Stop in foreground mode leaves renderers disabled but warm.
    player.engine.stop(false);
    player.settle();
    let resets_after_stop = player.renderer.resets.load(std::sync::atomic::Ordering::SeqCst);

    // Leaving foreground mode blocks until idle renderers released their
    // heavyweight resources.
    player.engine.set_foreground_mode(false);
    let resets_after_background =
        player.renderer.resets.load(std::sync::atomic::Ordering::SeqCst);
    assert!(resets_after_background > resets_after_stop);
}

#[test]
fn test_shared_position_tracks_playback() {
    let player = TestPlayer::new();
    player.prepare(single_period_timeline(10_000));
    let shared = player.engine.shared_position();
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(1_000);
    let observed = shared.position_us();
    assert!(
        (900_000..=1_100_000).contains(&observed),
        "position was {observed}"
    );
    assert!(shared.buffered_position_us() >= observed);
}

#[test]
fn test_timeline_refresh_mid_playback_keeps_position() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    let handle = player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(1_000);
    player.drain_events();

    // A refresh with identical geometry must neither jump nor rebuffer.
    handle.set_new_timeline(Arc::clone(&timeline));
    player.settle();
    let events = player.drain_events();
    assert!(discontinuities(&events).is_empty());
    player.advance_ms(100);
    let events = player.drain_events();
    assert_ne!(latest_state(&events), Some(PlaybackState::Buffering));
}

#[test]
fn test_shrinking_timeline_replaces_playback() {
    let player = TestPlayer::new();
    let first = multi_window_timeline(&[3_000, 2_000]);
    let handle = player.prepare(Arc::clone(&first));
    player.engine.set_play_when_ready(true);
    player.settle();
    player.advance_ms(500);
    player.drain_events();

    // The playing window vanishes; playback restarts from the surviving
    // window's default position.
    let survivor = Timeline::new(vec![WindowDef::new(vec![
        PeriodDef::new(2_000_000).with_uid(first.uid_of_period(1)),
    ])]);
    handle.set_new_timeline(Arc::clone(&survivor));
    player.settle();

    let events = player.run_until_state(PlaybackState::Ended, 400);
    let final_info = last_playback_info(&events).unwrap();
    assert_eq!(
        final_info.period_id.period_uid,
        first.uid_of_period(1)
    );
    assert_eq!(final_info.position_us, 2_000_000);
}
