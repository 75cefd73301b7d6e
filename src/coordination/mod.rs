//! Session-wide gates
//!
//! - Emergency stop: operator full stop shared across tasks
//! - Market schedule: exchange hours, entry cut-off and square-off time

pub mod emergency_stop;
pub mod schedule;

pub use emergency_stop::{EmergencyReason, EmergencyState, EmergencyStop};
pub use schedule::{MarketPhase, MarketSchedule};
