//! End-to-end session behaviour against the paper broker.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok};

use zerobot::config::AppConfig;
use zerobot::coordinator::{SessionCoordinator, SessionHandle, SessionSnapshot};
use zerobot::domain::{ExitReason, Instrument, OrderSide, PositionState, Signal};
use zerobot::error::RejectReason;
use zerobot::exchange::{FillMode, PaperGateway};
use zerobot::strategy::TradeLogger;
use zerobot::supervisor::{AlertLevel, AlertManager};

struct Harness {
    gateway: Arc<PaperGateway>,
    alerts: Arc<AlertManager>,
    handle: SessionHandle,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::paper(dec!(100000), 4);
    config.schedule.enabled = false;
    config.execution.price_poll_ms = 20;
    config.execution.poll_interval_ms = 5;
    config.execution.order_timeout_ms = 300;
    config.execution.exit_deadline_ms = 2_000;
    config.execution.exit_retry_base_ms = 10;
    config
}

async fn start(config: AppConfig) -> Harness {
    let gateway = Arc::new(PaperGateway::new(config.capital.total_capital));
    let alerts = Arc::new(AlertManager::from_config(&config.alerts));
    let coordinator = SessionCoordinator::new(&config, gateway.clone(), alerts.clone()).unwrap();
    let handle = coordinator.handle();
    tokio::spawn(coordinator.run());
    Harness {
        gateway,
        alerts,
        handle,
    }
}

async fn wait_for<F>(handle: &SessionHandle, what: &str, mut done: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

fn state_of(snapshot: &SessionSnapshot, id: &str) -> PositionState {
    snapshot.position(id).map(|p| p.state()).unwrap()
}

async fn open_long(h: &Harness, symbol: &str, price: Decimal) -> String {
    let instrument = Instrument::nse(symbol);
    h.gateway.set_price(&instrument, price).await;
    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument, dec!(0.8)))
        .await
        .unwrap();
    let id = outcome.position_id().unwrap().to_string();
    wait_for(&h.handle, "entry fill", |s| state_of(s, &id) == PositionState::Open).await;
    id
}

#[tokio::test]
async fn back_to_back_signals_split_free_capital() {
    let h = start(test_config()).await;

    let first = open_long(&h, "INFY", dec!(50)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    let position = snapshot.position(&first).unwrap();
    assert_eq!(position.quantity, 500);
    assert_eq!(position.allocated_capital, dec!(25000));

    let second = open_long(&h, "TCS", dec!(50)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    let position = snapshot.position(&second).unwrap();
    assert_eq!(position.quantity, 375);
    assert_eq!(position.allocated_capital, dec!(18750));
    assert_eq!(snapshot.ledger.committed, dec!(43750));
    assert_eq!(snapshot.ledger.free, dec!(56250));

    let again = h
        .handle
        .submit_signal(Signal::long(Instrument::nse("INFY"), dec!(0.8)))
        .await
        .unwrap();
    assert!(matches!(
        again.reject_reason(),
        Some(RejectReason::DuplicateInstrument(_))
    ));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn ledger_never_overcommits() {
    let h = start(test_config()).await;
    for (i, symbol) in ["A", "B", "C", "D", "E", "F"].iter().enumerate() {
        let instrument = Instrument::nse(*symbol);
        h.gateway
            .set_price(&instrument, dec!(40) + Decimal::from(i as u32 * 7))
            .await;
        if i == 2 {
            h.gateway.reject_next_orders(1).await;
        }
        let _ = h
            .handle
            .submit_signal(Signal::long(instrument, dec!(0.7)))
            .await
            .unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();
        let ledger = &snapshot.ledger;
        assert!(ledger.committed + ledger.reserved <= ledger.session_capital);
        assert!(ledger.slots <= 4);

        let settled = wait_for(&h.handle, "entry to settle", |s| {
            s.count_in(PositionState::PendingEntry) == 0
        })
        .await;
        let ledger = &settled.ledger;
        assert!(ledger.committed + ledger.reserved <= ledger.session_capital);
    }

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.count_in(PositionState::Open), 4);
    assert_eq!(snapshot.count_in(PositionState::Discarded), 1);
    assert_eq!(snapshot.ledger.reserved, Decimal::ZERO);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_entry_returns_capital() {
    let h = start(test_config()).await;
    let instrument = Instrument::nse("SBIN");
    h.gateway.set_price(&instrument, dec!(50)).await;
    h.gateway.reject_next_orders(1).await;

    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument, dec!(0.8)))
        .await
        .unwrap();
    let id = outcome.position_id().unwrap().to_string();

    let snapshot = wait_for(&h.handle, "entry discard", |s| {
        state_of(s, &id) == PositionState::Discarded
    })
    .await;
    assert_eq!(snapshot.ledger.free, dec!(100000));
    assert_eq!(snapshot.ledger.slots, 0);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn unfilled_entry_is_cancelled_after_timeout() {
    let h = start(test_config()).await;
    h.gateway.set_fill_mode(FillMode::Manual).await;
    let instrument = Instrument::nse("ITC");
    h.gateway.set_price(&instrument, dec!(50)).await;

    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument, dec!(0.8)))
        .await
        .unwrap();
    let id = outcome.position_id().unwrap().to_string();

    let snapshot = wait_for(&h.handle, "entry timeout", |s| {
        state_of(s, &id) == PositionState::Discarded
    })
    .await;
    assert_eq!(snapshot.ledger.free, dec!(100000));
    assert_eq!(h.gateway.open_order_count().await, 0);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn stop_loss_closes_position_and_books_loss() {
    let h = start(test_config()).await;
    let id = open_long(&h, "INFY", dec!(50)).await;

    let instrument = Instrument::nse("INFY");
    h.gateway.set_price(&instrument, dec!(49)).await;
    h.handle.price_tick(instrument, dec!(49)).await.unwrap();

    let snapshot = wait_for(&h.handle, "stop exit", |s| {
        state_of(s, &id) == PositionState::Closed
    })
    .await;
    let position = snapshot.position(&id).unwrap();
    assert_eq!(position.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(position.realized_pnl, Some(dec!(-500)));
    assert_eq!(snapshot.ledger.realized_pnl, dec!(-500));
    assert_eq!(snapshot.ledger.free, dec!(99500));
    assert_eq!(snapshot.stats.losing_trades, 1);

    let report = h.handle.shutdown().await.unwrap();
    assert_eq!(report.trades.len(), 1);
}

#[tokio::test]
async fn target_hit_closes_position_with_profit() {
    let h = start(test_config()).await;
    let id = open_long(&h, "TCS", dec!(50)).await;

    let instrument = Instrument::nse("TCS");
    h.gateway.set_price(&instrument, dec!(52)).await;
    h.handle.price_tick(instrument, dec!(52)).await.unwrap();

    let snapshot = wait_for(&h.handle, "target exit", |s| {
        state_of(s, &id) == PositionState::Closed
    })
    .await;
    let position = snapshot.position(&id).unwrap();
    assert_eq!(position.exit_reason, Some(ExitReason::Target));
    assert_eq!(position.exit_fill_price, Some(dec!(52)));
    assert_eq!(position.realized_pnl, Some(dec!(1000)));
    assert_eq!(snapshot.ledger.realized_pnl, dec!(1000));
    assert_eq!(snapshot.ledger.committed, Decimal::ZERO);
    // profits are not redeployed within the session
    assert_eq!(snapshot.ledger.free, dec!(100000));
    assert_eq!(snapshot.stats.winning_trades, 1);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn exit_survives_a_gateway_outage() {
    let h = start(test_config()).await;
    let id = open_long(&h, "AXISBANK", dec!(50)).await;

    h.gateway.set_outage(true).await;
    let instrument = Instrument::nse("AXISBANK");
    h.gateway.set_price(&instrument, dec!(49)).await;
    h.handle.price_tick(instrument, dec!(49)).await.unwrap();

    wait_for(&h.handle, "exit attempt to hit the outage", |s| {
        !s.gateway_available
            && state_of(s, &id) == PositionState::StoppedOut
            && s.position(&id).map_or(false, |p| p.exit_attempts >= 1)
    })
    .await;
    h.gateway.set_outage(false).await;

    let snapshot = wait_for(&h.handle, "exit after outage", |s| {
        state_of(s, &id) == PositionState::Closed
    })
    .await;
    assert!(snapshot.gateway_available);
    let position = snapshot.position(&id).unwrap();
    assert_eq!(position.exit_reason, Some(ExitReason::StopLoss));
    assert!(!position.unresolved);
    assert!(position.exit_attempts >= 2);
    assert_eq!(position.realized_pnl, Some(dec!(-500)));
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_exit_is_flagged_and_alerted_until_retried() {
    let mut config = test_config();
    config.execution.exit_deadline_ms = 150;
    let h = start(config).await;
    let mut alerts = h.alerts.subscribe();
    let id = open_long(&h, "TCS", dec!(50)).await;

    h.gateway.reject_side(OrderSide::Sell).await;
    let instrument = Instrument::nse("TCS");
    h.gateway.set_price(&instrument, dec!(49)).await;
    h.handle.price_tick(instrument, dec!(49)).await.unwrap();

    let snapshot = wait_for(&h.handle, "exit give-up", |s| {
        s.position(&id).map(|p| p.unresolved).unwrap_or(false)
    })
    .await;
    let position = snapshot.position(&id).unwrap();
    assert_eq!(position.state(), PositionState::StoppedOut);
    assert!(position.exit_attempts >= 1);
    assert_eq!(snapshot.ledger.committed, dec!(25000));
    assert!(!snapshot.is_flat());

    let critical = loop {
        let alert = tokio::time::timeout(Duration::from_secs(1), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        if alert.level == AlertLevel::Critical {
            break alert;
        }
    };
    assert!(critical.message.contains(&id));

    assert_err!(h.handle.reset(None).await);

    h.gateway.clear_rejections().await;
    assert_ok!(h.handle.retry_exit(id.clone()).await);
    assert_err!(h.handle.retry_exit(id.clone()).await);
    let snapshot = wait_for(&h.handle, "retried exit", |s| {
        state_of(s, &id) == PositionState::Closed
    })
    .await;
    assert!(!snapshot.position(&id).unwrap().unresolved);
    assert!(snapshot.is_flat());
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn end_of_day_squares_off_and_closes_entries() {
    let h = start(test_config()).await;
    let a = open_long(&h, "INFY", dec!(50)).await;
    let b = open_long(&h, "TCS", dec!(80)).await;

    h.handle.end_of_day().await.unwrap();
    let snapshot = wait_for(&h.handle, "square-off", |s| s.is_flat()).await;
    for id in [&a, &b] {
        let position = snapshot.position(id).unwrap();
        assert_eq!(position.state(), PositionState::Closed);
        assert_eq!(position.exit_reason, Some(ExitReason::EndOfDay));
    }
    assert!(snapshot.end_of_day);

    let late = h
        .handle
        .submit_signal(Signal::long(Instrument::nse("SBIN"), dec!(0.9)).with_reference_price(dec!(50)))
        .await
        .unwrap();
    assert!(matches!(
        late.reject_reason(),
        Some(RejectReason::EntriesClosed(_))
    ));

    let report = h.handle.reset(Some(dec!(200000))).await.unwrap();
    assert_eq!(report.trades.len(), 2);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.ledger.session_capital, dec!(200000));
    assert!(snapshot.positions.is_empty());
    assert!(!snapshot.end_of_day);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn halt_cancels_pending_entries() {
    let h = start(test_config()).await;
    h.gateway.set_fill_mode(FillMode::Manual).await;
    let instrument = Instrument::nse("WIPRO");
    h.gateway.set_price(&instrument, dec!(50)).await;

    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument.clone(), dec!(0.8)))
        .await
        .unwrap();
    let id = outcome.position_id().unwrap().to_string();
    assert_eq!(
        state_of(&h.handle.snapshot().await.unwrap(), &id),
        PositionState::PendingEntry
    );

    h.handle.halt("operator stop").await.unwrap();
    let snapshot = wait_for(&h.handle, "cancelled entry", |s| {
        state_of(s, &id) == PositionState::Discarded
    })
    .await;
    assert!(snapshot.halted);
    assert_eq!(snapshot.ledger.free, dec!(100000));
    assert_eq!(h.gateway.open_order_count().await, 0);

    let refused = h
        .handle
        .submit_signal(Signal::long(instrument, dec!(0.8)))
        .await
        .unwrap();
    assert!(!refused.is_accepted());
    assert!(h
        .alerts
        .recent_alerts()
        .await
        .iter()
        .any(|a| a.title == "Trading Halted"));
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn gateway_outage_blocks_new_entries() {
    let h = start(test_config()).await;
    let instrument = Instrument::nse("HDFCBANK");
    h.gateway.set_price(&instrument, dec!(50)).await;
    h.gateway.set_outage(true).await;

    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument.clone(), dec!(0.8)).with_reference_price(dec!(50)))
        .await
        .unwrap();
    assert!(matches!(
        outcome.reject_reason(),
        Some(RejectReason::GatewayUnavailable(_))
    ));
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.gateway_available);
    assert!(snapshot.positions.is_empty());
    assert!(h
        .alerts
        .recent_alerts()
        .await
        .iter()
        .any(|a| a.level == AlertLevel::Error && a.title == "Gateway Unavailable"));

    h.gateway.set_outage(false).await;
    let outcome = h
        .handle
        .submit_signal(Signal::long(instrument, dec!(0.8)))
        .await
        .unwrap();
    assert!(outcome.is_accepted());
    assert!(h.handle.snapshot().await.unwrap().gateway_available);
    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn closed_trades_are_journaled() {
    let path: PathBuf = std::env::temp_dir().join(format!(
        "zerobot-journal-{}.jsonl",
        uuid::Uuid::new_v4()
    ));
    let mut config = test_config();
    config.journal.path = Some(path.clone());
    let h = start(config).await;

    let id = open_long(&h, "LT", dec!(50)).await;
    let instrument = Instrument::nse("LT");
    h.gateway.set_price(&instrument, dec!(52)).await;
    h.handle.price_tick(instrument, dec!(52)).await.unwrap();
    wait_for(&h.handle, "target exit", |s| {
        state_of(s, &id) == PositionState::Closed
    })
    .await;
    h.handle.shutdown().await.unwrap();

    let records = TradeLogger::load(&path).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].position_id, id);
    assert_eq!(records[0].exit_reason, Some(ExitReason::Target));
    assert_eq!(records[0].pnl, dec!(1000));
    let _ = std::fs::remove_file(&path);
}
