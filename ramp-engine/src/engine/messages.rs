//! Timed message resolution and delivery

use super::core::{EngineInternal, EngineMessage, SeekPosition};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::message::{PendingMessageInfo, PlayerMessage};
use crate::timeline::Timeline;
use ramp_common::time::{ms_to_us, TIME_UNSET};
use ramp_common::PlaybackState;
use tracing::{error, trace};

/// Delivers a message to its target, honoring cancellation and always
/// acknowledging. Shared between worker-inline and external delivery.
fn deliver_message(message: &PlayerMessage) -> Result<()> {
    if message.is_canceled() {
        return Ok(());
    }
    trace!(message_type = message.message_type(), "delivering player message");
    let outcome = message
        .target()
        .handle_message(message.message_type(), message.payload());
    message.mark_as_processed(true);
    outcome
}

impl EngineInternal {
    pub(super) fn send_message_internal(&mut self, message: PlayerMessage) -> Result<()> {
        if message.position_ms() == TIME_UNSET {
            // No delivery position: deliver as soon as possible.
            return self.send_message_to_target(message);
        }
        if self.media_source.is_none() || self.pending_prepare_count > 0 {
            // No timeline yet to resolve the position against.
            self.pending_messages.push(PendingMessageInfo::new(message));
            return Ok(());
        }
        let mut pending = PendingMessageInfo::new(message);
        if self.resolve_pending_message_position(&mut pending) {
            self.pending_messages.push(pending);
            self.pending_messages
                .sort_by(|a, b| a.playback_order(b));
        } else {
            pending.message.mark_as_processed(false);
        }
        Ok(())
    }

    /// Routes a due message: inline when the target wants the playback
    /// worker, otherwise via the target's executor.
    pub(super) fn send_message_to_target(&mut self, message: PlayerMessage) -> Result<()> {
        let deliver_inline = match message.executor() {
            None => true,
            Some(executor) => executor.executor_id() == self.handler.id(),
        };
        if deliver_inline {
            deliver_message(&message)?;
            if matches!(
                self.playback_info.playback_state,
                PlaybackState::Ready | PlaybackState::Buffering
            ) {
                // The target may have changed something that requires
                // work.
                self.handler.send(EngineMessage::DoSomeWork);
            }
            Ok(())
        } else {
            self.handler
                .send(EngineMessage::SendMessageToTarget(message));
            Ok(())
        }
    }

    /// Posts a message to its target executor. A failure inside the
    /// external target surfaces as a remote error on the event channel.
    pub(super) fn send_message_to_target_executor(&mut self, message: PlayerMessage) {
        let Some(executor) = message.executor().cloned() else {
            return;
        };
        let event_tx = self.event_tx.clone();
        let message_for_task = message.clone();
        let posted = executor.post_task(Box::new(move || {
            if let Err(delivery_error) = deliver_message(&message_for_task) {
                error!("player message failed on external thread: {delivery_error}");
                let _ = event_tx.send(EngineEvent::PlaybackError(EngineError::Remote(
                    delivery_error.to_string(),
                )));
            }
        }));
        if !posted {
            // The target executor has shut down.
            message.mark_as_processed(false);
        }
    }

    /// Re-resolves every pending message against the current timeline,
    /// discarding the unresolvable ones.
    pub(super) fn resolve_pending_message_positions(&mut self) {
        for index in (0..self.pending_messages.len()).rev() {
            let mut pending = self.pending_messages[index].clone();
            if self.resolve_pending_message_position(&mut pending) {
                self.pending_messages[index] = pending;
            } else {
                pending.message.mark_as_processed(false);
                self.pending_messages.remove(index);
            }
        }
        self.pending_messages.sort_by(|a, b| a.playback_order(b));
    }

    fn resolve_pending_message_position(&self, pending: &mut PendingMessageInfo) -> bool {
        match pending.resolved_period_uid {
            None => {
                let Some(window_index) = pending.message.window_index() else {
                    return false;
                };
                let seek = SeekPosition {
                    timeline: Timeline::empty(),
                    window_index,
                    window_position_us: ms_to_us(pending.message.position_ms()),
                };
                let Some((period_uid, period_position_us)) =
                    self.resolve_seek_position(&seek, false)
                else {
                    return false;
                };
                let Some(period_index) =
                    self.playback_info.timeline.index_of_period(&period_uid)
                else {
                    return false;
                };
                pending.set_resolved_position(period_index, period_position_us, period_uid);
                true
            }
            Some(period_uid) => {
                // Resolved against a previous timeline: refresh the index.
                match self.playback_info.timeline.index_of_period(&period_uid) {
                    None => false,
                    Some(period_index) => {
                        pending.resolved_period_index = period_index;
                        true
                    }
                }
            }
        }
    }

    /// Delivers every pending message whose resolved coordinate lies in
    /// `(old_period_position_us, new_period_position_us]` of the playing
    /// period, correcting the cursor for seeks, timeline changes and new
    /// messages. No messages fire while an ad is playing.
    pub(super) fn maybe_trigger_pending_messages(
        &mut self,
        old_period_position_us: i64,
        new_period_position_us: i64,
    ) -> Result<()> {
        if self.pending_messages.is_empty() || self.playback_info.period_id.is_ad() {
            return Ok(());
        }
        // On the first tick from the start position the interval is
        // half-open on the wrong side; widen it so a message scheduled
        // exactly at the start position fires.
        let mut old_period_position_us = old_period_position_us;
        if self.playback_info.start_position_us == old_period_position_us {
            old_period_position_us -= 1;
        }
        let Some(current_period_index) = self
            .playback_info
            .timeline
            .index_of_period(&self.playback_info.period_id.period_uid)
        else {
            return Ok(());
        };

        // Walk the cursor backwards over messages at or after the current
        // coordinate.
        while self.next_pending_message_index > 0 {
            let previous = &self.pending_messages[self.next_pending_message_index - 1];
            let after_current = previous.resolved_period_index > current_period_index
                || (previous.resolved_period_index == current_period_index
                    && previous.resolved_period_time_us > old_period_position_us);
            if !after_current {
                break;
            }
            self.next_pending_message_index -= 1;
        }
        // Walk it forward over messages already behind the position.
        while self.next_pending_message_index < self.pending_messages.len() {
            let next = &self.pending_messages[self.next_pending_message_index];
            if !next.is_resolved() {
                break;
            }
            let behind_current = next.resolved_period_index < current_period_index
                || (next.resolved_period_index == current_period_index
                    && next.resolved_period_time_us <= old_period_position_us);
            if !behind_current {
                break;
            }
            self.next_pending_message_index += 1;
        }
        // Deliver everything inside the covered span.
        while self.next_pending_message_index < self.pending_messages.len() {
            let next = &self.pending_messages[self.next_pending_message_index];
            if !next.is_resolved()
                || next.resolved_period_index != current_period_index
                || next.resolved_period_time_us <= old_period_position_us
                || next.resolved_period_time_us > new_period_position_us
            {
                break;
            }
            let message = next.message.clone();
            let outcome = self.send_message_to_target(message.clone());
            if message.delete_after_delivery() || message.is_canceled() {
                self.pending_messages.remove(self.next_pending_message_index);
            } else {
                self.next_pending_message_index += 1;
            }
            outcome?;
        }
        Ok(())
    }
}
