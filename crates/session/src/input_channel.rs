//! Ingestion and buffering of participant commands.
//!
//! The channel is keyed by `(participant, target tick)`. Replay protection
//! is per participant: a command whose sequence number is not greater than
//! the last accepted one is rejected as stale. Out-of-order arrivals are
//! buffered up to a bounded tick window; once a tick's collection deadline
//! elapses, the channel releases that tick's command set. A participant with
//! nothing buffered at the deadline repeats its last released command, so
//! packet loss degrades gracefully instead of becoming a hard error.

use std::collections::HashMap;

use driftsync_core::{InputCommand, ParticipantId, Seq, SyncError, Tick};
use log::debug;

/// Buffered, sequence-checked command intake for one session.
pub struct InputChannel {
    /// Bounded buffering window, in ticks ahead of the current tick.
    window_ticks: u32,
    /// Last accepted sequence number per participant.
    last_seq: HashMap<ParticipantId, Seq>,
    /// Buffered commands keyed by (participant, target tick).
    buffer: HashMap<(ParticipantId, Tick), Vec<InputCommand>>,
    /// Most recent command released per participant, for loss fallback.
    last_released: HashMap<ParticipantId, InputCommand>,
}

impl InputChannel {
    pub fn new(window_ticks: u32) -> Self {
        Self {
            window_ticks,
            last_seq: HashMap::new(),
            buffer: HashMap::new(),
            last_released: HashMap::new(),
        }
    }

    /// Accept or reject a single command.
    ///
    /// Rejections are local: the caller logs and drops, the session loop is
    /// never aborted by a bad command.
    pub fn submit(&mut self, cmd: InputCommand, current_tick: Tick) -> Result<(), SyncError> {
        if !cmd.payload.is_finite() {
            return Err(SyncError::MalformedPacket(format!(
                "non-finite value in command seq {} from participant {}",
                cmd.seq, cmd.participant
            )));
        }

        // Duplicate/replay protection. Checked before the window so a
        // replayed old command is reported as stale, not merely late.
        if let Some(&last) = self.last_seq.get(&cmd.participant)
            && cmd.seq <= last
        {
            return Err(SyncError::StaleInput {
                participant: cmd.participant,
                seq: cmd.seq,
                last,
            });
        }

        // Bounded buffering window: too late (the current tick has already
        // been released and reconciled) or too early (beyond the window)
        // both drop. The sequence number is not recorded, so the sender may
        // resubmit the same seq retargeted at a future tick.
        if cmd.target_tick <= current_tick
            || cmd.target_tick > current_tick + self.window_ticks
        {
            return Err(SyncError::OutsideWindow {
                target_tick: cmd.target_tick,
                current_tick,
            });
        }

        self.last_seq.insert(cmd.participant, cmd.seq);
        self.buffer
            .entry((cmd.participant, cmd.target_tick))
            .or_default()
            .push(cmd);
        Ok(())
    }

    /// Release the command set for `tick`, called once its collection
    /// deadline elapses.
    ///
    /// Participants in `expected` with nothing buffered contribute a repeat
    /// of their last released command, retargeted to `tick`. Participants
    /// that have never sent anything contribute nothing.
    pub fn release(&mut self, tick: Tick, expected: &[ParticipantId]) -> Vec<InputCommand> {
        let mut released = Vec::new();

        for &participant in expected {
            match self.buffer.remove(&(participant, tick)) {
                Some(mut commands) => {
                    commands.sort_by_key(|c| c.seq);
                    if let Some(last) = commands.last() {
                        self.last_released.insert(participant, last.clone());
                    }
                    released.extend(commands);
                }
                None => {
                    if let Some(last) = self.last_released.get(&participant) {
                        debug!(
                            "participant {participant} missing input for tick {tick}, repeating seq {}",
                            last.seq
                        );
                        let mut repeat = last.clone();
                        repeat.target_tick = tick;
                        released.push(repeat);
                    }
                }
            }
        }

        // Anything still buffered for this tick came from unexpected
        // participants (left mid-window); drop it with the tick.
        self.buffer.retain(|&(_, t), _| t > tick);

        released
    }

    /// Remove all state belonging to a departing participant. Other
    /// participants' buffered inputs are untouched.
    pub fn remove_participant(&mut self, participant: ParticipantId) {
        self.last_seq.remove(&participant);
        self.last_released.remove(&participant);
        self.buffer.retain(|&(p, _), _| p != participant);
    }

    #[cfg(test)]
    fn has_buffered(&self, participant: ParticipantId, tick: Tick) -> bool {
        self.buffer.contains_key(&(participant, tick))
    }
}

// ============================================================================
// Tests
// ============================================================================
