use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Instrument;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

/// Broker product code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Product {
    /// Intraday, squared off by the broker at day end
    Mis,
    /// Cash and carry (delivery)
    Cnc,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Mis => "MIS",
            Product::Cnc => "CNC",
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted by the gateway, not yet on the exchange
    Pending,
    /// Working on the exchange
    Open,
    /// Fully filled
    Filled,
    /// Rejected by broker or exchange
    Rejected,
    /// Cancelled before filling
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Open)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub instrument: Instrument,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    pub product: Product,
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    /// Intraday market order, the only kind the bot sends for entries and exits
    pub fn market(instrument: Instrument, side: OrderSide, quantity: u64) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            instrument,
            side,
            quantity,
            order_type: OrderType::Market,
            product: Product::Mis,
            limit_price: None,
        }
    }

    pub fn limit(instrument: Instrument, side: OrderSide, quantity: u64, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            ..Self::market(instrument, side, quantity)
        }
    }
}

/// Order state as reported by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub average_price: Option<Decimal>,
    pub message: Option<String>,
}

impl OrderReport {
    pub fn filled(order_id: impl Into<String>, quantity: u64, price: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            status: OrderStatus::Filled,
            filled_quantity: quantity,
            average_price: Some(price),
            message: None,
        }
    }

    /// Rupee value actually traded
    pub fn fill_value(&self) -> Decimal {
        match self.average_price {
            Some(price) => price * Decimal::from(self.filled_quantity),
            None => Decimal::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn market_order_defaults_to_intraday() {
        let req = OrderRequest::market(Instrument::nse("INFY"), OrderSide::Buy, 10);
        assert_eq!(req.product, Product::Mis);
        assert_eq!(req.order_type, OrderType::Market);
        assert!(req.limit_price.is_none());
        assert!(!req.client_order_id.is_empty());

        let limit = OrderRequest::limit(Instrument::nse("INFY"), OrderSide::Sell, 5, dec!(1500));
        assert_eq!(limit.order_type, OrderType::Limit);
        assert_eq!(limit.limit_price, Some(dec!(1500)));
        assert_ne!(req.client_order_id, limit.client_order_id);
    }

    #[test]
    fn report_fill_value() {
        let report = OrderReport::filled("abc", 10, dec!(101.5));
        assert_eq!(report.fill_value(), dec!(1015.0));
        assert!(report.status.is_terminal());
        assert!(OrderStatus::Open.is_active());
    }
}
