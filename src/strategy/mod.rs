//! Strategy module
//!
//! Capital bookkeeping, position sizing and the signal inputs that feed them.
//!
//! - `ledger` - free / reserved / committed capital for the session
//! - `allocator` - pure accept/reject and sizing decision per signal
//! - `signal_source` - where signals come from (channel, replay, JSONL)
//! - `stats`, `trade_logger` - closed-trade metrics and journal

pub mod allocator;
pub mod ledger;
pub mod signal_source;
pub mod stats;
pub mod trade_logger;

pub use allocator::{Allocation, AllocationDecision, CapitalAllocator};
pub use ledger::{CapitalLedger, LedgerSnapshot};
pub use signal_source::{ChannelSignalSource, JsonlSignalSource, ReplaySignalSource, SignalSource};
pub use stats::SessionStats;
pub use trade_logger::{TradeLogger, TradeRecord};
