use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::OrderSide;

/// Indian cash-market exchange an instrument trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NSE" => Ok(Exchange::Nse),
            "BSE" => Ok(Exchange::Bse),
            other => Err(format!("unknown exchange '{}'; expected NSE|BSE", other)),
        }
    }
}

/// A tradable instrument, rendered in Kite's `EXCHANGE:SYMBOL` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instrument {
    pub exchange: Exchange,
    pub symbol: String,
}

impl Instrument {
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into().trim().to_ascii_uppercase(),
        }
    }

    pub fn nse(symbol: impl Into<String>) -> Self {
        Self::new(Exchange::Nse, symbol)
    }

    pub fn bse(symbol: impl Into<String>) -> Self {
        Self::new(Exchange::Bse, symbol)
    }

    /// Kite quote key (`NSE:INFY`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.exchange, self.symbol)
    }

    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty() && !self.symbol.chars().any(|c| c.is_whitespace() || c == ':')
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (exchange, symbol) = match raw.split_once(':') {
            Some((exchange, symbol)) => (exchange.parse::<Exchange>()?, symbol),
            // Bare symbols default to NSE
            None => (Exchange::Nse, raw),
        };
        let instrument = Instrument::new(exchange, symbol);
        if !instrument.is_valid() {
            return Err(format!("invalid instrument '{}'", raw));
        }
        Ok(instrument)
    }
}

impl TryFrom<String> for Instrument {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Instrument> for String {
    fn from(instrument: Instrument) -> Self {
        instrument.key()
    }
}

/// Direction of an intraday trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Order side that opens a trade in this direction
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Order side that flattens a trade in this direction
    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Direction::Long),
            "SHORT" | "SELL" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_parses_kite_keys() {
        let inst: Instrument = "bse:reliance".parse().unwrap();
        assert_eq!(inst.exchange, Exchange::Bse);
        assert_eq!(inst.symbol, "RELIANCE");
        assert_eq!(inst.key(), "BSE:RELIANCE");

        let bare: Instrument = "INFY".parse().unwrap();
        assert_eq!(bare, Instrument::nse("INFY"));

        assert!("MCX:GOLD".parse::<Instrument>().is_err());
        assert!("NSE:".parse::<Instrument>().is_err());
    }

    #[test]
    fn instrument_serializes_as_key() {
        let json = serde_json::to_string(&Instrument::nse("tcs")).unwrap();
        assert_eq!(json, "\"NSE:TCS\"");
        let back: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.symbol, "TCS");
    }

    #[test]
    fn direction_sides_are_opposite() {
        assert_eq!(Direction::Long.entry_side(), OrderSide::Buy);
        assert_eq!(Direction::Long.exit_side(), OrderSide::Sell);
        assert_eq!(Direction::Short.entry_side(), OrderSide::Sell);
        assert_eq!(Direction::Short.exit_side(), OrderSide::Buy);
        assert_eq!("sell".parse::<Direction>().unwrap(), Direction::Short);
    }
}
