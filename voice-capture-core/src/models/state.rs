use std::fmt;

use serde::{Deserialize, Serialize};

/// Recording/recognition state machine.
///
/// State transitions:
/// ```text
/// NONE ──start──▶ RECORDING ──stop──▶ RECOGNIZING ──result/error──▶ NONE
///   ▲                 │                    │
///   └──── cancel ─────┴────── cancel ──────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    #[default]
    None,
    Recording,
    Recognizing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Recording => "RECORDING",
            Self::Recognizing => "RECOGNIZING",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_recognizing(&self) -> bool {
        matches!(self, Self::Recognizing)
    }

    /// Whether `self → next` is an edge of the state machine.
    ///
    /// Cancellation (any state → NONE) is included. Self-loops are not.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::None, Self::Recording)
                | (Self::Recording, Self::Recognizing)
                | (Self::Recording, Self::None)
                | (Self::Recognizing, Self::None)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_host_protocol() {
        assert_eq!(SessionState::None.as_str(), "NONE");
        assert_eq!(SessionState::Recording.to_string(), "RECORDING");
        assert_eq!(
            serde_json::to_string(&SessionState::Recognizing).unwrap(),
            "\"RECOGNIZING\""
        );
    }

    #[test]
    fn only_machine_edges_are_legal() {
        use SessionState::*;
        assert!(None.can_transition_to(Recording));
        assert!(Recording.can_transition_to(Recognizing));
        assert!(Recognizing.can_transition_to(None));
        assert!(Recording.can_transition_to(None));

        assert!(!None.can_transition_to(Recognizing));
        assert!(!Recognizing.can_transition_to(Recording));
        assert!(!None.can_transition_to(None));
    }
}
