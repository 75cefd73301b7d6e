use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Direction, Instrument};

/// External request to consider opening a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: Instrument,
    pub direction: Direction,
    /// Strategy confidence in `[0, 1]`
    pub confidence: Decimal,
    /// Price the strategy saw; the session uses the live price when absent
    #[serde(default)]
    pub reference_price: Option<Decimal>,
    /// Which strategy produced it
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(instrument: Instrument, direction: Direction, confidence: Decimal) -> Self {
        Self {
            instrument,
            direction,
            confidence,
            reference_price: None,
            source: None,
            generated_at: Utc::now(),
        }
    }

    pub fn long(instrument: Instrument, confidence: Decimal) -> Self {
        Self::new(instrument, Direction::Long, confidence)
    }

    pub fn short(instrument: Instrument, confidence: Decimal) -> Self {
        Self::new(instrument, Direction::Short, confidence)
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Structural checks; returns a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if !self.instrument.is_valid() {
            return Err(format!("invalid instrument '{}'", self.instrument));
        }
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            ));
        }
        if let Some(price) = self.reference_price {
            if price <= Decimal::ZERO {
                return Err(format!("non-positive reference price {}", price));
            }
        }
        Ok(())
    }
}
