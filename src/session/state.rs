//! Turn-taking state machine
//!
//! A session is in exactly one of five states. Transitions happen only
//! through the table in `can_transition_to`; anything arriving after
//! `Terminated` is discarded by the orchestrator.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Pre-start
    Idle,
    /// Waiting for user speech
    Listening,
    /// Running STT / LLM / tools
    Thinking,
    /// Assistant audio is playing at the client
    Speaking,
    /// Ended; terminal
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the transition is permitted
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // end() may fire from any state
            (_, Terminated) => true,
            // session.start completes with no first-message synthesis
            (Idle, Listening) => true,
            // first-message synthesis begins
            (Idle, Speaking) => true,
            // endpointing fired
            (Listening, Thinking) => true,
            // LLM produced content, TTS initiated
            (Thinking, Speaking) => true,
            // empty / tool-only turn
            (Thinking, Listening) => true,
            // playback finished or interruption
            (Speaking, Listening) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_permitted_transitions() {
        assert!(Idle.can_transition_to(Listening));
        assert!(Idle.can_transition_to(Speaking));
        assert!(Listening.can_transition_to(Thinking));
        assert!(Thinking.can_transition_to(Speaking));
        assert!(Thinking.can_transition_to(Listening));
        assert!(Speaking.can_transition_to(Listening));
    }

    #[test]
    fn test_forbidden_transitions() {
        assert!(!Listening.can_transition_to(Speaking));
        assert!(!Speaking.can_transition_to(Thinking));
        assert!(!Idle.can_transition_to(Thinking));
        assert!(!Listening.can_transition_to(Idle));
    }

    #[test]
    fn test_terminated_is_terminal_and_reachable_from_anywhere() {
        for state in [Idle, Listening, Thinking, Speaking, Terminated] {
            assert!(state.can_transition_to(Terminated));
        }
        assert!(!Terminated.can_transition_to(Listening));
        assert!(!Terminated.can_transition_to(Speaking));
    }
}
