//! End-to-end playback scenarios driven through the virtual clock
//!
//! Each test assembles the engine with fake renderers/sources/selectors,
//! issues commands, advances virtual time in scheduler intervals, and
//! asserts on the event stream.

mod helpers;

use helpers::*;
use ramp_common::{DiscontinuityReason, PlaybackState, RepeatMode};
use ramp_engine::error::EngineError;
use ramp_engine::events::EngineEvent;
use ramp_engine::message::{MessageTarget, PlayerMessage};
use ramp_engine::timeline::Timeline;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_simple_play_through() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    let events = player.run_until_state(PlaybackState::Ended, 1_200);
    let states = state_sequence(&events);
    assert_eq!(
        states,
        vec![
            PlaybackState::Buffering,
            PlaybackState::Ready,
            PlaybackState::Ended
        ]
    );

    let final_info = last_playback_info(&events).unwrap();
    assert_eq!(final_info.position_us, 10_000_000);
    assert_eq!(final_info.period_id.period_uid, timeline.uid_of_period(0));
}

#[test]
fn test_seek_and_wait() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();
    player.advance_ms(2_000);
    player.drain_events();

    player
        .engine
        .seek_to(Arc::clone(&timeline), 0, 5_000_000);
    player.engine.blocking_sync();

    let events = player.drain_events();
    let jumps = discontinuities(&events);
    assert_eq!(jumps.len(), 1, "exactly one discontinuity: {events:?}");
    let (reason, period_uid, position_us) = jumps[0];
    assert_eq!(reason, DiscontinuityReason::Seek);
    assert_eq!(period_uid, timeline.uid_of_period(0));
    assert_eq!(position_us, 5_000_000);

    // The requested position was exact, so no later adjustment arrives and
    // playback finishes from the new position.
    let events = player.run_until_state(PlaybackState::Ended, 700);
    assert!(discontinuities(&events).is_empty());
    assert_eq!(last_playback_info(&events).unwrap().position_us, 10_000_000);
}

#[test]
fn test_period_transition() {
    let player = TestPlayer::new();
    let timeline = multi_period_timeline(&[3_000, 2_000]);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    let events = player.run_until_state(PlaybackState::Ended, 700);
    let jumps = discontinuities(&events);
    assert_eq!(jumps.len(), 1, "one transition expected: {jumps:?}");
    let (reason, period_uid, position_us) = jumps[0];
    assert_eq!(reason, DiscontinuityReason::PeriodTransition);
    assert_eq!(period_uid, timeline.uid_of_period(1));
    assert_eq!(position_us, 0);

    // The second period plays out to its own duration.
    assert_eq!(last_playback_info(&events).unwrap().position_us, 2_000_000);
}

#[test]
fn test_ad_insertion() {
    let player = TestPlayer::new();
    let timeline = ad_timeline(10_000, 4_000, 1_500);
    let content_uid = timeline.uid_of_period(0);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    let events = player.run_until_state(PlaybackState::Ended, 1_400);
    let jumps = discontinuities(&events);
    assert_eq!(jumps.len(), 2, "into-ad and out-of-ad: {jumps:?}");

    // Into the ad at the scheduled content position.
    assert_eq!(jumps[0].0, DiscontinuityReason::AdInsertion);
    assert_eq!(jumps[0].1, content_uid);
    assert_eq!(jumps[0].2, 0); // ad-local position

    // Back to content exactly where it was suspended: ads do not advance
    // content time.
    assert_eq!(jumps[1].0, DiscontinuityReason::AdInsertion);
    assert_eq!(jumps[1].1, content_uid);
    assert_eq!(jumps[1].2, 4_000_000);

    let into_ad = events
        .iter()
        .find_map(|event| match event {
            EngineEvent::PlaybackInfoChanged {
                discontinuity: Some(DiscontinuityReason::AdInsertion),
                playback_info,
                ..
            } if playback_info.period_id.is_ad() => Some(playback_info.clone()),
            _ => None,
        })
        .expect("an ad period became current");
    assert_eq!(into_ad.period_id.ad_group_index, Some(0));
    assert_eq!(into_ad.period_id.ad_index_in_group, Some(0));
    assert_eq!(into_ad.content_position_us, 4_000_000);

    // Content then plays to its full duration.
    assert_eq!(last_playback_info(&events).unwrap().position_us, 10_000_000);
}

struct RecordingTarget {
    hits: AtomicUsize,
    positions: Mutex<Vec<i64>>,
    shared_position: Arc<ramp_engine::playback_info::SharedPosition>,
}

impl MessageTarget for RecordingTarget {
    fn handle_message(
        &self,
        _message_type: i32,
        _payload: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), EngineError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.positions
            .lock()
            .unwrap()
            .push(self.shared_position.position_us());
        Ok(())
    }
}

#[test]
fn test_timed_message_delivery() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));

    let target = Arc::new(RecordingTarget {
        hits: AtomicUsize::new(0),
        positions: Mutex::new(Vec::new()),
        shared_position: player.engine.shared_position(),
    });
    let message = PlayerMessage::builder(Arc::clone(&target) as Arc<dyn MessageTarget>, 1)
        .at_position(0, 3_500)
        .build();
    player.engine.send_message(message.clone());
    player.engine.blocking_sync();

    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    // Not delivered before the scheduled position.
    player.advance_ms(3_000);
    assert_eq!(target.hits.load(Ordering::SeqCst), 0);

    player.advance_ms(1_000);
    assert_eq!(target.hits.load(Ordering::SeqCst), 1);
    assert!(message.blocking_await_delivery());

    // Deleted after delivery: replaying across the position does not fire
    // it again.
    player.engine.seek_to(Arc::clone(&timeline), 0, 0);
    player.engine.blocking_sync();
    player.advance_ms(5_000);
    assert_eq!(target.hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_repeat_mode_change_during_playback() {
    let player = TestPlayer::new();
    let timeline = multi_window_timeline(&[3_000, 2_000]);
    player.prepare(Arc::clone(&timeline));
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    // With repeat off the timeline plays to its end.
    player.run_until_state(PlaybackState::Ended, 700);

    player.engine.set_repeat_mode(RepeatMode::All);
    player.engine.seek_to(Arc::clone(&timeline), 0, 0);
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    let events = player.run_until_state(PlaybackState::Ready, 50);
    assert!(state_sequence(&events).contains(&PlaybackState::Buffering));

    // Two full traversals of the timeline later, playback is still going:
    // with repeat-all there is no final period.
    player.advance_ms(2 * (3_000 + 2_000) + 500);
    let events = player.drain_events();
    assert!(!state_sequence(&events).contains(&PlaybackState::Ended));
    assert_eq!(
        player
            .drain_events()
            .iter()
            .filter(|e| e.is_error())
            .count(),
        0
    );
}

#[test]
fn test_timed_message_without_position_delivers_immediately() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(timeline);

    let target = Arc::new(RecordingTarget {
        hits: AtomicUsize::new(0),
        positions: Mutex::new(Vec::new()),
        shared_position: player.engine.shared_position(),
    });
    let message =
        PlayerMessage::builder(Arc::clone(&target) as Arc<dyn MessageTarget>, 9).build();
    player.engine.send_message(message.clone());
    player.engine.blocking_sync();
    assert_eq!(target.hits.load(Ordering::SeqCst), 1);
    assert!(message.blocking_await_delivery());
}

#[test]
fn test_canceled_message_is_never_delivered() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(10_000);
    player.prepare(Arc::clone(&timeline));

    let target = Arc::new(RecordingTarget {
        hits: AtomicUsize::new(0),
        positions: Mutex::new(Vec::new()),
        shared_position: player.engine.shared_position(),
    });
    let message = PlayerMessage::builder(Arc::clone(&target) as Arc<dyn MessageTarget>, 1)
        .at_position(0, 2_000)
        .build();
    player.engine.send_message(message.clone());
    player.engine.blocking_sync();
    message.cancel();

    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();
    player.advance_ms(4_000);
    assert_eq!(target.hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_play_through_emits_monotonic_operation_acks() {
    let player = TestPlayer::new();
    let timeline = single_period_timeline(1_000);
    player.prepare(timeline);
    player.engine.set_play_when_ready(true);
    player.engine.blocking_sync();

    let events = player.run_until_state(PlaybackState::Ended, 200);
    let total_acks: u32 = events
        .iter()
        .map(|event| match event {
            EngineEvent::PlaybackInfoChanged { operation_acks, .. } => *operation_acks,
            _ => 0,
        })
        .sum();
    // The prepare is acknowledged exactly once across all emissions.
    assert_eq!(total_acks, 1);
}
