//! Transition tables of the arbitration engine.
//!
//! Kept free of engine access so the priority rules can be checked on their own.

use super::table::ToneState;
use crate::session::CallState;

/// Physical action taken when a session leaves its current tone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// Stop the ring stream playing the ringback.
    StopRingback,
    /// Stop the ringtone player, or the in-call waiting tone when another
    /// session is in a call.
    StopRingtone,
    /// Stop the transient tone unconditionally.
    StopTone,
    /// Leaving a call: stop the waiting tone if another session is ringing.
    StopWaitingTone,
    /// Nothing is playing for this session, the state is left untouched.
    Nothing,
}

impl StopAction {
    pub fn changes_state(&self) -> bool {
        !matches!(self, StopAction::Nothing)
    }
}

const STOP_TABLE: [(ToneState, StopAction); 5] = [
    (ToneState::Ringback, StopAction::StopRingback),
    (ToneState::Ringtone, StopAction::StopRingtone),
    (ToneState::Tone, StopAction::StopTone),
    (ToneState::Call, StopAction::StopWaitingTone),
    (ToneState::None, StopAction::Nothing),
];

pub fn stop_action(from: ToneState) -> StopAction {
    STOP_TABLE
        .iter()
        .find(|(state, _)| *state == from)
        .map(|(_, action)| *action)
        .unwrap_or(StopAction::Nothing)
}

/// Reaction to a call state change of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Restore the ringtone of another ringing session, silenced by a
    /// previous transition.
    RestartOtherRingtone,
    /// Stop everything for the session and play the end-of-call tone.
    EndOfCall,
    /// The session now carries a call; re-evaluate pending rings.
    EnterCall,
    Ignore,
}

const UPDATE_TABLE: [(CallState, UpdateAction); 7] = [
    (CallState::UpdatedByRemote, UpdateAction::RestartOtherRingtone),
    (CallState::Updating, UpdateAction::RestartOtherRingtone),
    (CallState::Error, UpdateAction::EndOfCall),
    (CallState::End, UpdateAction::EndOfCall),
    (CallState::StreamsRunning, UpdateAction::EnterCall),
    (CallState::Paused, UpdateAction::EnterCall),
    (CallState::PausedByRemote, UpdateAction::EnterCall),
];

pub fn update_action(call_state: CallState) -> UpdateAction {
    UPDATE_TABLE
        .iter()
        .find(|(state, _)| *state == call_state)
        .map(|(_, action)| *action)
        .unwrap_or(UpdateAction::Ignore)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_table() {
        assert_eq!(stop_action(ToneState::Ringback), StopAction::StopRingback);
        assert_eq!(stop_action(ToneState::Ringtone), StopAction::StopRingtone);
        assert_eq!(stop_action(ToneState::Tone), StopAction::StopTone);
        assert_eq!(stop_action(ToneState::Call), StopAction::StopWaitingTone);
        assert_eq!(stop_action(ToneState::None), StopAction::Nothing);
        assert!(!stop_action(ToneState::None).changes_state());
        assert!(stop_action(ToneState::Call).changes_state());
    }

    #[test]
    fn test_update_table() {
        assert_eq!(
            update_action(CallState::Updating),
            UpdateAction::RestartOtherRingtone
        );
        assert_eq!(
            update_action(CallState::UpdatedByRemote),
            UpdateAction::RestartOtherRingtone
        );
        assert_eq!(update_action(CallState::End), UpdateAction::EndOfCall);
        assert_eq!(update_action(CallState::Error), UpdateAction::EndOfCall);
        assert_eq!(update_action(CallState::StreamsRunning), UpdateAction::EnterCall);
        assert_eq!(update_action(CallState::Paused), UpdateAction::EnterCall);
        assert_eq!(update_action(CallState::PausedByRemote), UpdateAction::EnterCall);

        for ignored in [
            CallState::Idle,
            CallState::IncomingReceived,
            CallState::OutgoingRinging,
            CallState::Connected,
            CallState::Pausing,
            CallState::Resuming,
            CallState::Released,
        ] {
            assert_eq!(update_action(ignored), UpdateAction::Ignore, "{:?}", ignored);
        }
    }
}
