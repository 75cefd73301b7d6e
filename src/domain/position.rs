use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, ExitReason, Instrument, PositionState, StateTransition};
use crate::error::{BotError, Result};

/// One intraday trade, from accepted signal to flattened exit.
///
/// Stop-loss and target are fixed when the position is created; there is no
/// setter for either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub instrument: Instrument,
    pub direction: Direction,
    pub quantity: u64,
    /// Capital earmarked for this trade (`quantity * entry_price`)
    pub allocated_capital: Decimal,
    /// Reference price the allocation was sized from
    pub entry_price: Decimal,
    stop_loss: Decimal,
    target: Decimal,
    state: PositionState,
    pub entry_order_id: Option<String>,
    pub exit_order_id: Option<String>,
    pub entry_fill_price: Option<Decimal>,
    pub exit_fill_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    /// Shares already sold (or bought back) by partially filled exit orders
    #[serde(default)]
    pub exited_quantity: u64,
    /// Rupee value of those partial exit fills
    #[serde(default)]
    pub exit_proceeds: Decimal,
    /// Exit retries exhausted; capital still committed, needs an operator
    pub unresolved: bool,
    pub exit_attempts: u32,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        instrument: Instrument,
        direction: Direction,
        quantity: u64,
        allocated_capital: Decimal,
        entry_price: Decimal,
        stop_loss: Decimal,
        target: Decimal,
        source: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instrument,
            direction,
            quantity,
            allocated_capital,
            entry_price,
            stop_loss,
            target,
            state: PositionState::PendingEntry,
            entry_order_id: None,
            exit_order_id: None,
            entry_fill_price: None,
            exit_fill_price: None,
            realized_pnl: None,
            exit_reason: None,
            exited_quantity: 0,
            exit_proceeds: Decimal::ZERO,
            unresolved: false,
            exit_attempts: 0,
            source,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    pub fn target(&self) -> Decimal {
        self.target
    }

    /// Short id for log lines
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }

    fn transition(&mut self, to: PositionState, reason: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(BotError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions
            .push(StateTransition::new(self.state, to, reason));
        self.state = to;
        Ok(())
    }

    /// PENDING_ENTRY -> OPEN on a confirmed entry fill
    pub fn mark_open(&mut self, fill_price: Decimal) -> Result<()> {
        self.transition(PositionState::Open, "entry filled")?;
        self.entry_fill_price = Some(fill_price);
        self.opened_at = Some(Utc::now());
        Ok(())
    }

    /// PENDING_ENTRY -> DISCARDED when the entry never filled
    pub fn discard(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(PositionState::Discarded, reason)?;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// OPEN -> STOPPED_OUT / TARGET_HIT / FORCE_CLOSED
    pub fn begin_exit(&mut self, reason: ExitReason) -> Result<()> {
        self.transition(reason.exit_state(), reason.as_str())?;
        self.exit_reason = Some(reason);
        Ok(())
    }

    /// Shares still held at the broker
    pub fn remaining_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.exited_quantity)
    }

    /// Part of the position traded out; returns what is left.
    /// A fill covering everything that is left must go through `mark_closed`.
    pub fn record_partial_exit(&mut self, quantity: u64, price: Decimal) -> Result<u64> {
        if !self.state.is_exiting() {
            return Err(BotError::Validation(format!(
                "partial exit on position {} in state {}",
                self.short_id(),
                self.state
            )));
        }
        if quantity == 0 || quantity >= self.remaining_quantity() {
            return Err(BotError::Validation(format!(
                "partial exit of {} on position {} with {} remaining",
                quantity,
                self.short_id(),
                self.remaining_quantity()
            )));
        }
        self.exited_quantity += quantity;
        self.exit_proceeds += price * Decimal::from(quantity);
        Ok(self.remaining_quantity())
    }

    /// Exit filled: -> CLOSED, returns realized P&L.
    /// `exit_price` is the fill of the remaining quantity; earlier partial
    /// fills are folded into the average exit price.
    pub fn mark_closed(&mut self, exit_price: Decimal) -> Result<Decimal> {
        self.transition(PositionState::Closed, "exit filled")?;
        let entry = self.entry_fill_price.unwrap_or(self.entry_price);
        let exit_price = if self.exited_quantity > 0 && self.quantity > 0 {
            let rest = Decimal::from(self.remaining_quantity());
            (self.exit_proceeds + exit_price * rest) / Decimal::from(self.quantity)
        } else {
            exit_price
        };
        self.exited_quantity = self.quantity;
        let pnl = (exit_price - entry) * Decimal::from(self.quantity) * self.direction.sign();
        self.exit_fill_price = Some(exit_price);
        self.realized_pnl = Some(pnl);
        self.unresolved = false;
        self.closed_at = Some(Utc::now());
        Ok(pnl)
    }

    /// Which exit, if any, the observed price triggers. Stop is checked first.
    pub fn exit_trigger(&self, price: Decimal) -> Option<ExitReason> {
        if self.state != PositionState::Open {
            return None;
        }
        let (stop_hit, target_hit) = match self.direction {
            Direction::Long => (price <= self.stop_loss, price >= self.target),
            Direction::Short => (price >= self.stop_loss, price <= self.target),
        };
        if stop_hit {
            Some(ExitReason::StopLoss)
        } else if target_hit {
            Some(ExitReason::Target)
        } else {
            None
        }
    }

    /// Mark-to-market P&L at `price` (zero unless the entry has filled)
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.entry_fill_price {
            Some(entry) if self.state.holds_capital() => {
                let open = (price - entry) * Decimal::from(self.remaining_quantity());
                let booked = self.exit_proceeds - entry * Decimal::from(self.exited_quantity);
                (open + booked) * self.direction.sign()
            }
            _ => Decimal::ZERO,
        }
    }

    /// Worst-case loss if the stop fills exactly
    pub fn risk_at_stop(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs() * Decimal::from(self.quantity)
    }
}
