//! Position sizing and risk gate.
//!
//! `CapitalAllocator::evaluate` is pure: it reads the ledger and returns a
//! decision, the caller applies it.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use super::ledger::CapitalLedger;
use crate::config::CapitalConfig;
use crate::domain::{Direction, Signal};
use crate::error::RejectReason;

/// Sizing for an accepted signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub quantity: u64,
    /// Budget granted (free capital / max positions)
    pub budget: Decimal,
    /// Capital actually used (`quantity * reference_price`)
    pub capital: Decimal,
    pub reference_price: Decimal,
    pub stop_loss: Decimal,
    pub target: Decimal,
    /// Loss if the stop fills exactly
    pub risk: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationDecision {
    Accepted(Allocation),
    Rejected(RejectReason),
}

impl AllocationDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AllocationDecision::Accepted(_))
    }
}

#[derive(Debug, Clone)]
pub struct CapitalAllocator {
    config: CapitalConfig,
}

impl CapitalAllocator {
    pub fn new(config: CapitalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CapitalConfig {
        &self.config
    }

    /// Stop and target for an entry at `price`
    pub fn exit_levels(&self, direction: Direction, price: Decimal) -> (Decimal, Decimal) {
        let sl = self.config.stop_loss_pct;
        let tgt = self.config.target_pct;
        let (stop, target) = match direction {
            Direction::Long => (price * (Decimal::ONE - sl), price * (Decimal::ONE + tgt)),
            Direction::Short => (price * (Decimal::ONE + sl), price * (Decimal::ONE - tgt)),
        };
        (stop.round_dp(2), target.round_dp(2))
    }

    pub fn evaluate(
        &self,
        signal: &Signal,
        last_price: Decimal,
        ledger: &CapitalLedger,
    ) -> AllocationDecision {
        use AllocationDecision::Rejected;

        // 1. Signal shape
        if let Err(reason) = signal.validate() {
            return Rejected(RejectReason::InvalidSignal(reason));
        }
        if last_price <= Decimal::ZERO {
            return Rejected(RejectReason::InvalidSignal(format!(
                "non-positive price {}",
                last_price
            )));
        }

        // 2. Confidence floor
        if signal.confidence < self.config.min_confidence {
            return Rejected(RejectReason::LowConfidence {
                confidence: signal.confidence,
                minimum: self.config.min_confidence,
            });
        }

        // 3. Slots
        let max = self.config.max_positions;
        if max == 0 || ledger.slots() >= max {
            return Rejected(RejectReason::MaxPositionsReached {
                open: ledger.slots(),
                max,
            });
        }

        // 4-5. Equal split of what is still free, whole shares only
        let free = ledger.free_capital();
        let budget = free / Decimal::from(max);
        let quantity = (budget / last_price).floor().to_u64().unwrap_or(0);
        if quantity == 0 {
            return Rejected(RejectReason::InsufficientCapital {
                budget,
                price: last_price,
            });
        }
        let capital = Decimal::from(quantity) * last_price;

        // 6. Exit levels
        let (stop_loss, target) = self.exit_levels(signal.direction, last_price);

        // 7. Risk per trade
        let risk = Decimal::from(quantity) * (last_price - stop_loss).abs();
        let limit = self.config.risk_per_trade * ledger.session_capital();
        if risk > limit {
            return Rejected(RejectReason::RiskLimitExceeded { risk, limit });
        }

        debug!(
            instrument = %signal.instrument,
            direction = %signal.direction,
            quantity,
            %budget,
            %capital,
            %stop_loss,
            %target,
            "allocation accepted"
        );

        AllocationDecision::Accepted(Allocation {
            quantity,
            budget,
            capital,
            reference_price: last_price,
            stop_loss,
            target,
            risk,
        })
    }

    /// Allocation sequence for `count` back-to-back signals at `price`,
    /// assuming every entry fills
    pub fn plan(&self, count: usize, price: Decimal) -> Vec<AllocationDecision> {
        let mut ledger = CapitalLedger::new(self.config.total_capital);
        let mut decisions = Vec::with_capacity(count);
        for i in 0..count {
            let signal = Signal::long(crate::domain::Instrument::nse(format!("PLAN{}", i)), Decimal::ONE)
                .with_reference_price(price);
            let decision = self.evaluate(&signal, price, &ledger);
            if let AllocationDecision::Accepted(alloc) = &decision {
                let id = format!("plan-{}", i);
                if ledger.reserve(&id, alloc.capital).is_ok() {
                    let _ = ledger.commit(&id);
                }
            }
            decisions.push(decision);
        }
        decisions
    }
}
