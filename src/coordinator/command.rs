//! Messages into and out of the session loop

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::oneshot;

use super::session::{SessionReport, SessionSnapshot};
use crate::coordination::EmergencyReason;
use crate::domain::{Instrument, Signal};
use crate::error::{RejectReason, Result};
use crate::strategy::Allocation;

/// Control and data commands accepted by the session coordinator
#[derive(Debug)]
pub enum SessionCommand {
    /// Evaluate a signal; the reply says whether an entry was placed
    SubmitSignal {
        signal: Signal,
        reply: oneshot::Sender<SignalOutcome>,
    },
    /// Externally observed last price
    PriceTick {
        instrument: Instrument,
        price: Decimal,
    },
    /// Square off everything and stop taking entries for the day
    EndOfDay,
    /// Full stop: cancel pending entries, refuse new ones
    Halt {
        reason: EmergencyReason,
        context: String,
    },
    /// Lift a halt
    Resume,
    /// Restart the exit worker of an unresolved position
    RetryExit {
        position_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Start a fresh session; fails while capital is still held
    Reset {
        capital: Option<Decimal>,
        reply: oneshot::Sender<Result<SessionReport>>,
    },
    Shutdown(oneshot::Sender<SessionReport>),
}

/// Result of submitting one signal
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SignalOutcome {
    Accepted {
        position_id: String,
        allocation: Allocation,
    },
    Rejected {
        reason: String,
        #[serde(skip)]
        detail: RejectReason,
    },
}

impl SignalOutcome {
    pub fn rejected(reason: RejectReason) -> Self {
        SignalOutcome::Rejected {
            reason: reason.to_string(),
            detail: reason,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SignalOutcome::Accepted { .. })
    }

    pub fn position_id(&self) -> Option<&str> {
        match self {
            SignalOutcome::Accepted { position_id, .. } => Some(position_id),
            SignalOutcome::Rejected { .. } => None,
        }
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            SignalOutcome::Accepted { .. } => None,
            SignalOutcome::Rejected { detail, .. } => Some(detail),
        }
    }
}

/// Reports from order-tracking tasks back to the session loop
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    EntryFilled {
        position_id: String,
        order_id: String,
        /// `None` when the gateway confirmed the fill without a price
        fill_price: Option<Decimal>,
        filled_quantity: u64,
    },
    EntryFailed {
        position_id: String,
        order_id: Option<String>,
        reason: String,
        gateway_down: bool,
    },
    ExitSubmitted {
        position_id: String,
        order_id: String,
        attempt: u32,
    },
    ExitAttemptFailed {
        position_id: String,
        attempt: u32,
        reason: String,
        gateway_down: bool,
    },
    /// Part of the remaining quantity traded; the rest is still open
    ExitPartiallyFilled {
        position_id: String,
        order_id: String,
        quantity: u64,
        fill_price: Option<Decimal>,
    },
    /// The remaining quantity is flat; `fill_price` is that last order's average
    ExitFilled {
        position_id: String,
        order_id: String,
        fill_price: Option<Decimal>,
    },
    ExitUnresolved {
        position_id: String,
        attempts: u32,
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn position_id(&self) -> &str {
        match self {
            LifecycleEvent::EntryFilled { position_id, .. }
            | LifecycleEvent::EntryFailed { position_id, .. }
            | LifecycleEvent::ExitSubmitted { position_id, .. }
            | LifecycleEvent::ExitAttemptFailed { position_id, .. }
            | LifecycleEvent::ExitPartiallyFilled { position_id, .. }
            | LifecycleEvent::ExitFilled { position_id, .. }
            | LifecycleEvent::ExitUnresolved { position_id, .. } => position_id,
        }
    }
}
