//! Session capital bookkeeping.
//!
//! Capital moves through three buckets: free, reserved (entry order in flight)
//! and committed (filled position not yet flattened). The ledger guarantees
//! `committed + reserved <= session_capital` after every operation.
//! Intraday profits are booked but not redeployed; losses shrink free capital.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{BotError, RejectReason, Result};

#[derive(Debug, Clone)]
pub struct CapitalLedger {
    session_capital: Decimal,
    reservations: HashMap<String, Decimal>,
    commitments: HashMap<String, Decimal>,
    reserved: Decimal,
    committed: Decimal,
    realized_pnl: Decimal,
}

/// Point-in-time copy of the ledger totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub session_capital: Decimal,
    pub reserved: Decimal,
    pub committed: Decimal,
    pub free: Decimal,
    pub realized_pnl: Decimal,
    pub slots: u32,
}

impl CapitalLedger {
    pub fn new(session_capital: Decimal) -> Self {
        Self {
            session_capital,
            reservations: HashMap::new(),
            commitments: HashMap::new(),
            reserved: Decimal::ZERO,
            committed: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn session_capital(&self) -> Decimal {
        self.session_capital
    }

    pub fn reserved(&self) -> Decimal {
        self.reserved
    }

    pub fn committed(&self) -> Decimal {
        self.committed
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// Positions holding capital (pending entries + filled positions)
    pub fn slots(&self) -> u32 {
        (self.reservations.len() + self.commitments.len()) as u32
    }

    /// Capital still available for new entries
    pub fn free_capital(&self) -> Decimal {
        let base = (self.session_capital + self.realized_pnl).min(self.session_capital);
        (base - self.committed - self.reserved).max(Decimal::ZERO)
    }

    pub fn invariant_holds(&self) -> bool {
        self.reserved >= Decimal::ZERO
            && self.committed >= Decimal::ZERO
            && self.committed + self.reserved <= self.session_capital
    }

    /// Earmark capital for an entry order about to be placed
    pub fn reserve(&mut self, position_id: &str, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(BotError::Validation(format!(
                "reservation must be positive, got {}",
                amount
            )));
        }
        if self.reservations.contains_key(position_id) || self.commitments.contains_key(position_id)
        {
            return Err(BotError::Internal(format!(
                "position {} already holds capital",
                position_id
            )));
        }
        let free = self.free_capital();
        if amount > free {
            return Err(RejectReason::CapitalExhausted {
                free,
                required: amount,
            }
            .into());
        }
        self.reservations.insert(position_id.to_string(), amount);
        self.reserved += amount;
        debug!(position_id, %amount, free = %self.free_capital(), "capital reserved");
        Ok(())
    }

    /// Entry filled: the reservation becomes committed capital
    pub fn commit(&mut self, position_id: &str) -> Result<Decimal> {
        let amount = self
            .reservations
            .remove(position_id)
            .ok_or_else(|| BotError::PositionNotFound(position_id.to_string()))?;
        self.reserved -= amount;
        self.committed += amount;
        self.commitments.insert(position_id.to_string(), amount);
        debug!(position_id, %amount, "capital committed");
        Ok(amount)
    }

    /// Entry failed: hand the reservation back untouched
    pub fn release_reservation(&mut self, position_id: &str) -> Result<Decimal> {
        let amount = self
            .reservations
            .remove(position_id)
            .ok_or_else(|| BotError::PositionNotFound(position_id.to_string()))?;
        self.reserved -= amount;
        debug!(position_id, %amount, "reservation released");
        Ok(amount)
    }

    /// Exit filled: free the committed capital and book the result
    pub fn settle(&mut self, position_id: &str, pnl: Decimal) -> Result<Decimal> {
        let amount = self
            .commitments
            .remove(position_id)
            .ok_or_else(|| BotError::PositionNotFound(position_id.to_string()))?;
        self.committed -= amount;
        self.realized_pnl += pnl;
        debug!(position_id, %amount, %pnl, "position settled");
        Ok(amount)
    }

    /// Start a fresh session; refuses while any capital is still out
    pub fn reset(&mut self, session_capital: Decimal) -> Result<()> {
        if !self.commitments.is_empty() || !self.reservations.is_empty() {
            return Err(BotError::Validation(format!(
                "cannot reset ledger with {} positions holding capital",
                self.slots()
            )));
        }
        *self = Self::new(session_capital);
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            session_capital: self.session_capital,
            reserved: self.reserved,
            committed: self.committed,
            free: self.free_capital(),
            realized_pnl: self.realized_pnl,
            slots: self.slots(),
        }
    }
}
