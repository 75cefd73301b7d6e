use serde::{Deserialize, Serialize};
use std::fmt;

/// Position lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    /// Entry order submitted, waiting for fill confirmation
    PendingEntry,
    /// Entry filled, monitoring stop-loss and target
    Open,
    /// Stop-loss crossed, exit order in flight
    StoppedOut,
    /// Target crossed, exit order in flight
    TargetHit,
    /// End-of-day square-off, exit order in flight
    ForceClosed,
    /// Exit confirmed filled
    Closed,
    /// Entry never filled (rejected, cancelled or timed out)
    Discarded,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::PendingEntry => "PENDING_ENTRY",
            PositionState::Open => "OPEN",
            PositionState::StoppedOut => "STOPPED_OUT",
            PositionState::TargetHit => "TARGET_HIT",
            PositionState::ForceClosed => "FORCE_CLOSED",
            PositionState::Closed => "CLOSED",
            PositionState::Discarded => "DISCARDED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: PositionState) -> bool {
        use PositionState::*;

        match (self, target) {
            // From PendingEntry
            (PendingEntry, Open) => true,      // Entry filled
            (PendingEntry, Discarded) => true, // Rejected/timeout/cancelled

            // From Open
            (Open, StoppedOut) => true,
            (Open, TargetHit) => true,
            (Open, ForceClosed) => true,

            // Exit confirmed
            (StoppedOut, Closed) => true,
            (TargetHit, Closed) => true,
            (ForceClosed, Closed) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<PositionState> {
        use PositionState::*;

        match self {
            PendingEntry => vec![Open, Discarded],
            Open => vec![StoppedOut, TargetHit, ForceClosed],
            StoppedOut | TargetHit | ForceClosed => vec![Closed],
            Closed | Discarded => vec![],
        }
    }

    /// Exit order submitted but not yet confirmed
    pub fn is_exiting(&self) -> bool {
        matches!(
            self,
            PositionState::StoppedOut | PositionState::TargetHit | PositionState::ForceClosed
        )
    }

    /// Holds committed capital (filled and not yet flattened)
    pub fn holds_capital(&self) -> bool {
        matches!(self, PositionState::Open) || self.is_exiting()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Closed | PositionState::Discarded)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PositionState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING_ENTRY" => Ok(PositionState::PendingEntry),
            "OPEN" => Ok(PositionState::Open),
            "STOPPED_OUT" => Ok(PositionState::StoppedOut),
            "TARGET_HIT" => Ok(PositionState::TargetHit),
            "FORCE_CLOSED" => Ok(PositionState::ForceClosed),
            "CLOSED" => Ok(PositionState::Closed),
            "DISCARDED" => Ok(PositionState::Discarded),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// Why a position was flattened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    Target,
    EndOfDay,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Target => "target",
            ExitReason::EndOfDay => "end_of_day",
        }
    }

    /// State the position enters when this exit fires
    pub fn exit_state(&self) -> PositionState {
        match self {
            ExitReason::StopLoss => PositionState::StoppedOut,
            ExitReason::Target => PositionState::TargetHit,
            ExitReason::EndOfDay => PositionState::ForceClosed,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State transition event (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PositionState,
    pub to: PositionState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: PositionState, to: PositionState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use PositionState::*;

        assert!(PendingEntry.can_transition_to(Open));
        assert!(PendingEntry.can_transition_to(Discarded));
        assert!(Open.can_transition_to(StoppedOut));
        assert!(Open.can_transition_to(TargetHit));
        assert!(Open.can_transition_to(ForceClosed));
        assert!(StoppedOut.can_transition_to(Closed));
        assert!(TargetHit.can_transition_to(Closed));
        assert!(ForceClosed.can_transition_to(Closed));

        // Never open without a fill, never close without an exit
        assert!(!PendingEntry.can_transition_to(Closed));
        assert!(!PendingEntry.can_transition_to(StoppedOut));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Discarded));
        assert!(!StoppedOut.can_transition_to(TargetHit));
        assert!(!Closed.can_transition_to(Open));
    }

    #[test]
    fn test_valid_transitions_agree_with_predicate() {
        use PositionState::*;
        let all = [
            PendingEntry,
            Open,
            StoppedOut,
            TargetHit,
            ForceClosed,
            Closed,
            Discarded,
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    from.valid_transitions().contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(
            PositionState::try_from("target_hit").unwrap(),
            PositionState::TargetHit
        );
        assert!(PositionState::try_from("HALF_OPEN").is_err());
    }

    #[test]
    fn test_exit_reason_states() {
        assert_eq!(ExitReason::StopLoss.exit_state(), PositionState::StoppedOut);
        assert_eq!(ExitReason::Target.exit_state(), PositionState::TargetHit);
        assert_eq!(ExitReason::EndOfDay.exit_state(), PositionState::ForceClosed);
        assert!(PositionState::ForceClosed.holds_capital());
        assert!(!PositionState::PendingEntry.holds_capital());
    }
}
