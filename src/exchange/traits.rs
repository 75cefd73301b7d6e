use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{Instrument, OrderReport, OrderRequest};
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Paper,
    Kite,
}

impl Default for GatewayKind {
    fn default() -> Self {
        Self::Paper
    }
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Kite => "kite",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "demo" | "sim" => Ok(Self::Paper),
            "kite" | "zerodha" => Ok(Self::Kite),
            _ => Err("invalid gateway; expected paper|kite"),
        }
    }
}

pub fn parse_gateway_kind(raw: &str) -> Result<GatewayKind> {
    GatewayKind::from_str(raw).map_err(|e| BotError::Validation(e.to_string()))
}

/// Failure reported by a broker gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Broker refused the request (margin, validation, order state)
    #[error("rejected: {0}")]
    Rejected(String),

    /// No answer within the allowed time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Broker unreachable or failing server-side
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Response could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Worth retrying the same request later
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Unavailable(_))
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Brokerage order and price API the trading core depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    /// Submit an order; returns the broker order id
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<String>;

    async fn order_status(&self, order_id: &str) -> GatewayResult<OrderReport>;

    /// Returns false when the order was no longer cancellable
    async fn cancel_order(&self, order_id: &str) -> GatewayResult<bool>;

    async fn last_price(&self, instrument: &Instrument) -> GatewayResult<Decimal>;
}
