//! Session coordinator
//!
//! Single-writer owner of the trading day. Signals, price ticks and operator
//! commands arrive through a `SessionHandle`; order tracking runs in
//! `OrderLifecycle` tasks that report back as `LifecycleEvent`s.

pub mod command;
pub mod coordinator;
pub mod lifecycle;
pub mod session;

pub use command::{LifecycleEvent, SessionCommand, SignalOutcome};
pub use coordinator::{drive_signals, SessionCoordinator, SessionHandle, SignalTally};
pub use lifecycle::OrderLifecycle;
pub use session::{Admission, PositionBook, SessionReport, SessionSnapshot, TradingSession};
