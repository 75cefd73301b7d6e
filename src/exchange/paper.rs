//! In-memory simulated broker.
//!
//! Market orders fill at the last set price (plus optional slippage). Tests and
//! demo sessions use the failure knobs to reproduce broker rejections, stuck
//! orders and outages without touching the network.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{GatewayError, GatewayKind, GatewayResult, OrderGateway};
use crate::domain::{Instrument, OrderReport, OrderRequest, OrderSide, OrderStatus, OrderType};

/// How accepted orders reach a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Filled as soon as they are placed
    Immediate,
    /// Filled on the n-th status query
    AfterPolls(u32),
    /// Stay open until `fill_open_orders` is called
    Manual,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    report: OrderReport,
    polls: u32,
}

#[derive(Debug)]
struct PaperState {
    prices: HashMap<Instrument, Decimal>,
    orders: HashMap<String, PaperOrder>,
    placed: Vec<OrderRequest>,
    cash: Decimal,
    fill_mode: FillMode,
    slippage_pct: Decimal,
    outage: bool,
    reject_next: u32,
    fail_next: u32,
    reject_after_accept: u32,
    rejected_sides: Vec<OrderSide>,
}

/// Simulated broker used for paper trading and tests
pub struct PaperGateway {
    state: Mutex<PaperState>,
}

impl PaperGateway {
    pub fn new(cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                prices: HashMap::new(),
                orders: HashMap::new(),
                placed: Vec::new(),
                cash,
                fill_mode: FillMode::Immediate,
                slippage_pct: Decimal::ZERO,
                outage: false,
                reject_next: 0,
                fail_next: 0,
                reject_after_accept: 0,
                rejected_sides: Vec::new(),
            }),
        }
    }

    pub async fn set_price(&self, instrument: &Instrument, price: Decimal) {
        let mut state = self.state.lock().await;
        state.prices.insert(instrument.clone(), price);
    }

    pub async fn set_fill_mode(&self, mode: FillMode) {
        self.state.lock().await.fill_mode = mode;
    }

    /// Fraction of price lost on every fill (buys pay up, sells receive less)
    pub async fn set_slippage(&self, pct: Decimal) {
        self.state.lock().await.slippage_pct = pct;
    }

    /// While set, every call fails with `Unavailable`
    pub async fn set_outage(&self, outage: bool) {
        let mut state = self.state.lock().await;
        if state.outage != outage {
            info!(outage, "paper gateway outage toggled");
        }
        state.outage = outage;
    }

    /// Refuse the next `n` placements outright
    pub async fn reject_next_orders(&self, n: u32) {
        self.state.lock().await.reject_next = n;
    }

    /// Fail the next `n` placements with a transient error
    pub async fn fail_next_orders(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    /// Accept the next `n` placements, then report them rejected by the exchange
    pub async fn reject_after_accept(&self, n: u32) {
        self.state.lock().await.reject_after_accept = n;
    }

    /// Refuse every order on `side` until cleared
    pub async fn reject_side(&self, side: OrderSide) {
        let mut state = self.state.lock().await;
        if !state.rejected_sides.contains(&side) {
            state.rejected_sides.push(side);
        }
    }

    pub async fn clear_rejections(&self) {
        let mut state = self.state.lock().await;
        state.rejected_sides.clear();
        state.reject_next = 0;
        state.fail_next = 0;
        state.reject_after_accept = 0;
    }

    /// Fill every order still open at the current prices
    pub async fn fill_open_orders(&self) -> usize {
        let mut state = self.state.lock().await;
        let open: Vec<String> = state
            .orders
            .iter()
            .filter(|(_, o)| o.report.status.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        let mut filled = 0;
        for id in open {
            if state.fill(&id).is_ok() {
                filled += 1;
            }
        }
        filled
    }

    pub async fn cash(&self) -> Decimal {
        self.state.lock().await.cash
    }

    /// Every request that reached `place_order`, accepted or not
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.placed.clone()
    }

    pub async fn open_order_count(&self) -> usize {
        self.state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.report.status.is_active())
            .count()
    }
}

impl PaperState {
    fn fill_price(&self, request: &OrderRequest) -> Option<Decimal> {
        let last = match (request.order_type, request.limit_price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => *self.prices.get(&request.instrument)?,
        };
        let adj = last * self.slippage_pct;
        Some(match request.side {
            OrderSide::Buy => last + adj,
            OrderSide::Sell => last - adj,
        })
    }

    fn fill(&mut self, order_id: &str) -> GatewayResult<()> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {}", order_id)))?;
        let price = self.fill_price(&order.request).ok_or_else(|| {
            GatewayError::Rejected(format!("no price for {}", order.request.instrument))
        })?;
        let qty = order.request.quantity;
        let side = order.request.side;
        let value = price * Decimal::from(qty);
        match side {
            OrderSide::Buy => self.cash -= value,
            OrderSide::Sell => self.cash += value,
        }
        if let Some(order) = self.orders.get_mut(order_id) {
            order.report = OrderReport::filled(order_id, qty, price);
        }
        debug!(order_id, %side, qty, %price, "paper fill");
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Paper
    }

    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<String> {
        let mut state = self.state.lock().await;
        state.placed.push(request.clone());

        if state.outage {
            return Err(GatewayError::Unavailable("paper outage".into()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(GatewayError::Unavailable("simulated network failure".into()));
        }
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(GatewayError::Rejected("simulated rejection".into()));
        }
        if state.rejected_sides.contains(&request.side) {
            return Err(GatewayError::Rejected(format!(
                "{} orders are being rejected",
                request.side
            )));
        }
        if request.quantity == 0 {
            return Err(GatewayError::Rejected("quantity must be positive".into()));
        }

        let order_id = Uuid::new_v4().simple().to_string();
        let report = if state.reject_after_accept > 0 {
            state.reject_after_accept -= 1;
            OrderReport {
                order_id: order_id.clone(),
                status: OrderStatus::Rejected,
                filled_quantity: 0,
                average_price: None,
                message: Some("simulated exchange rejection".into()),
            }
        } else {
            OrderReport {
                order_id: order_id.clone(),
                status: OrderStatus::Open,
                filled_quantity: 0,
                average_price: None,
                message: None,
            }
        };
        let status = report.status;
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                request: request.clone(),
                report,
                polls: 0,
            },
        );

        if status == OrderStatus::Open && state.fill_mode == FillMode::Immediate {
            if let Err(e) = state.fill(&order_id) {
                state.orders.remove(&order_id);
                return Err(e);
            }
        }

        debug!(
            order_id = %order_id,
            instrument = %request.instrument,
            side = %request.side,
            qty = request.quantity,
            "paper order placed"
        );
        Ok(order_id)
    }

    async fn order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        let mut state = self.state.lock().await;
        if state.outage {
            return Err(GatewayError::Unavailable("paper outage".into()));
        }
        let mode = state.fill_mode;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {}", order_id)))?;
        order.polls += 1;
        let due = matches!(mode, FillMode::AfterPolls(n) if order.polls >= n);
        if due && order.report.status.is_active() {
            state.fill(order_id)?;
        }
        state
            .orders
            .get(order_id)
            .map(|o| o.report.clone())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {}", order_id)))
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<bool> {
        let mut state = self.state.lock().await;
        if state.outage {
            return Err(GatewayError::Unavailable("paper outage".into()));
        }
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {}", order_id)))?;
        if order.report.status.is_active() {
            order.report.status = OrderStatus::Cancelled;
            order.report.message = Some("cancelled by user".into());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn last_price(&self, instrument: &Instrument) -> GatewayResult<Decimal> {
        let state = self.state.lock().await;
        if state.outage {
            return Err(GatewayError::Unavailable("paper outage".into()));
        }
        state
            .prices
            .get(instrument)
            .copied()
            .ok_or_else(|| GatewayError::Rejected(format!("no quote for {}", instrument)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn infy() -> Instrument {
        Instrument::nse("INFY")
    }

    #[tokio::test]
    async fn market_order_fills_at_last_price() {
        let gw = PaperGateway::new(dec!(10000));
        gw.set_price(&infy(), dec!(1500)).await;

        let id = gw
            .place_order(&OrderRequest::market(infy(), OrderSide::Buy, 4))
            .await
            .unwrap();
        let report = gw.order_status(&id).await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.average_price, Some(dec!(1500)));
        assert_eq!(gw.cash().await, dec!(4000));
    }

    #[tokio::test]
    async fn manual_fill_mode_keeps_orders_open_until_released() {
        let gw = PaperGateway::new(dec!(10000));
        gw.set_price(&infy(), dec!(100)).await;
        gw.set_fill_mode(FillMode::Manual).await;

        let id = gw
            .place_order(&OrderRequest::market(infy(), OrderSide::Buy, 1))
            .await
            .unwrap();
        assert_eq!(gw.order_status(&id).await.unwrap().status, OrderStatus::Open);
        assert_eq!(gw.fill_open_orders().await, 1);
        assert_eq!(gw.order_status(&id).await.unwrap().status, OrderStatus::Filled);
        assert!(!gw.cancel_order(&id).await.unwrap());
    }

    #[tokio::test]
    async fn after_polls_fill_mode() {
        let gw = PaperGateway::new(dec!(10000));
        gw.set_price(&infy(), dec!(100)).await;
        gw.set_fill_mode(FillMode::AfterPolls(2)).await;

        let id = gw
            .place_order(&OrderRequest::market(infy(), OrderSide::Buy, 1))
            .await
            .unwrap();
        assert_eq!(gw.order_status(&id).await.unwrap().status, OrderStatus::Open);
        assert_eq!(gw.order_status(&id).await.unwrap().status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn failure_knobs() {
        let gw = PaperGateway::new(dec!(10000));
        gw.set_price(&infy(), dec!(100)).await;
        let buy = OrderRequest::market(infy(), OrderSide::Buy, 1);

        gw.reject_next_orders(1).await;
        assert!(matches!(
            gw.place_order(&buy).await,
            Err(GatewayError::Rejected(_))
        ));

        gw.set_outage(true).await;
        assert!(matches!(
            gw.last_price(&infy()).await,
            Err(GatewayError::Unavailable(_))
        ));
        gw.set_outage(false).await;

        gw.reject_after_accept(1).await;
        let id = gw.place_order(&buy).await.unwrap();
        assert_eq!(
            gw.order_status(&id).await.unwrap().status,
            OrderStatus::Rejected
        );

        gw.reject_side(OrderSide::Sell).await;
        let sell = OrderRequest::market(infy(), OrderSide::Sell, 1);
        assert!(gw.place_order(&sell).await.is_err());
        gw.clear_rejections().await;
        assert!(gw.place_order(&sell).await.is_ok());
        assert_eq!(gw.placed_orders().await.len(), 4);
    }

    #[tokio::test]
    async fn slippage_moves_fill_against_trader() {
        let gw = PaperGateway::new(dec!(0));
        gw.set_price(&infy(), dec!(100)).await;
        gw.set_slippage(dec!(0.01)).await;

        let id = gw
            .place_order(&OrderRequest::market(infy(), OrderSide::Sell, 1))
            .await
            .unwrap();
        let report = gw.order_status(&id).await.unwrap();
        assert_eq!(report.average_price, Some(dec!(99.00)));
    }
}
