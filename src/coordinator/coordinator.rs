//! Session coordinator: the single task that owns a trading day.
//!
//! Everything that mutates the ledger or the position book happens inside
//! `SessionCoordinator::run`. Callers hold a clonable `SessionHandle`; order
//! tracking runs in `OrderLifecycle` tasks that report back over a channel.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command::{LifecycleEvent, SessionCommand, SignalOutcome};
use super::lifecycle::OrderLifecycle;
use super::session::{SessionReport, SessionSnapshot, TradingSession};
use crate::config::{AppConfig, ExecutionConfig};
use crate::coordination::{EmergencyReason, EmergencyStop, MarketPhase, MarketSchedule};
use crate::domain::{ExitReason, Instrument, PositionState, Signal};
use crate::error::{BotError, RejectReason, Result};
use crate::exchange::{GatewayError, OrderGateway};
use crate::strategy::{SignalSource, TradeLogger};
use crate::supervisor::AlertManager;

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;
const SCHEDULE_CHECK: Duration = Duration::from_secs(1);

/// Clonable front door to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BotError::ChannelClosed("session command channel closed".into()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|_| BotError::ChannelClosed("session dropped reply".into()))
    }

    /// Evaluate a signal; returns once the entry order is placed or the
    /// signal is rejected
    pub async fn submit_signal(&self, signal: Signal) -> Result<SignalOutcome> {
        self.request(|reply| SessionCommand::SubmitSignal { signal, reply })
            .await
    }

    pub async fn price_tick(&self, instrument: Instrument, price: Decimal) -> Result<()> {
        self.send(SessionCommand::PriceTick { instrument, price }).await
    }

    pub async fn end_of_day(&self) -> Result<()> {
        self.send(SessionCommand::EndOfDay).await
    }

    /// Operator full stop
    pub async fn halt(&self, context: impl Into<String>) -> Result<()> {
        self.halt_for(EmergencyReason::Manual, context).await
    }

    pub async fn halt_for(&self, reason: EmergencyReason, context: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::Halt {
            reason,
            context: context.into(),
        })
        .await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SessionCommand::Resume).await
    }

    pub async fn retry_exit(&self, position_id: impl Into<String>) -> Result<()> {
        let position_id = position_id.into();
        self.request(|reply| SessionCommand::RetryExit { position_id, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(SessionCommand::Snapshot).await
    }

    pub async fn reset(&self, capital: Option<Decimal>) -> Result<SessionReport> {
        self.request(|reply| SessionCommand::Reset { capital, reply })
            .await?
    }

    pub async fn shutdown(&self) -> Result<SessionReport> {
        self.request(SessionCommand::Shutdown).await
    }

    /// Poll until nothing is pending or open and every exit has either
    /// filled or been given up on, or `limit` elapses
    pub async fn wait_until_settled(&self, limit: Duration) -> Result<SessionSnapshot> {
        let started = Instant::now();
        loop {
            let snapshot = self.snapshot().await?;
            let settled = snapshot
                .positions
                .iter()
                .all(|p| p.state().is_terminal() || p.unresolved);
            if settled || started.elapsed() >= limit {
                return Ok(snapshot);
            }
            sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Counts from feeding a signal source into a session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SignalTally {
    pub accepted: u32,
    pub rejected: u32,
}

/// Forward every signal from `source` until it is exhausted
pub async fn drive_signals<S>(source: &mut S, handle: &SessionHandle) -> Result<SignalTally>
where
    S: SignalSource + ?Sized,
{
    let mut tally = SignalTally::default();
    while let Some(signal) = source.next_signal().await {
        let instrument = signal.instrument.clone();
        match handle.submit_signal(signal).await? {
            SignalOutcome::Accepted { position_id, .. } => {
                debug!(source = source.name(), %instrument, %position_id, "signal accepted");
                tally.accepted += 1;
            }
            SignalOutcome::Rejected { reason, .. } => {
                info!(source = source.name(), %instrument, %reason, "signal rejected");
                tally.rejected += 1;
            }
        }
    }
    info!(
        source = source.name(),
        accepted = tally.accepted,
        rejected = tally.rejected,
        "signal source exhausted"
    );
    Ok(tally)
}

pub struct SessionCoordinator {
    session: TradingSession,
    gateway: Arc<dyn OrderGateway>,
    lifecycle: OrderLifecycle,
    schedule: MarketSchedule,
    alerts: Arc<AlertManager>,
    emergency: EmergencyStop,
    journal: TradeLogger,
    config: ExecutionConfig,

    command_tx: mpsc::Sender<SessionCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
    event_rx: mpsc::Receiver<LifecycleEvent>,

    /// Cancel switches of entries still in flight
    entry_cancels: HashMap<String, oneshot::Sender<String>>,
    /// Positions with a live exit worker
    exit_workers: HashSet<String>,
    last_prices: HashMap<Instrument, Decimal>,
    gateway_available: bool,
    end_of_day: bool,
}

impl SessionCoordinator {
    pub fn new(
        config: &AppConfig,
        gateway: Arc<dyn OrderGateway>,
        alerts: Arc<AlertManager>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let lifecycle = OrderLifecycle::new(gateway.clone(), config.execution.clone(), event_tx);

        Ok(Self {
            session: TradingSession::new(config.capital.clone()),
            gateway,
            lifecycle,
            schedule: MarketSchedule::from_config(&config.schedule)?,
            alerts,
            emergency: EmergencyStop::new(),
            journal: TradeLogger::new(config.journal.path.clone()),
            config: config.execution.clone(),
            command_tx,
            command_rx,
            event_rx,
            entry_cancels: HashMap::new(),
            exit_workers: HashSet::new(),
            last_prices: HashMap::new(),
            gateway_available: true,
            end_of_day: false,
        })
    }

    pub fn with_schedule(mut self, schedule: MarketSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Share the full-stop flag with other components
    pub fn with_emergency_stop(mut self, emergency: EmergencyStop) -> Self {
        self.emergency = emergency;
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.command_tx.clone(),
        }
    }

    pub fn emergency_stop(&self) -> EmergencyStop {
        self.emergency.clone()
    }

    /// Main loop; returns the final report after `shutdown`
    pub async fn run(mut self) -> SessionReport {
        info!(
            capital = %self.session.ledger().session_capital(),
            max_positions = self.session.allocator().config().max_positions,
            gateway = %self.gateway.kind(),
            schedule = self.schedule.is_enabled(),
            "session coordinator starting"
        );

        let mut price_tick = interval(self.config.price_poll());
        let mut schedule_tick = interval(SCHEDULE_CHECK);
        price_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        schedule_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // --- Commands from handles ---
                Some(command) = self.command_rx.recv() => {
                    if let Some(report) = self.handle_command(command).await {
                        info!("session coordinator: main loop exited");
                        return report;
                    }
                }

                // --- Order worker reports ---
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event).await;
                }

                // --- Periodic: mark open positions ---
                _ = price_tick.tick() => {
                    self.poll_prices().await;
                }

                // --- Periodic: exchange clock ---
                _ = schedule_tick.tick() => {
                    self.check_schedule().await;
                }
            }
        }
    }

    /// Returns the final report once shutdown is requested
    async fn handle_command(&mut self, command: SessionCommand) -> Option<SessionReport> {
        match command {
            SessionCommand::SubmitSignal { signal, reply } => {
                let outcome = self.handle_signal(signal).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::PriceTick { instrument, price } => {
                self.on_price(&instrument, price);
            }
            SessionCommand::EndOfDay => self.end_of_day("requested").await,
            SessionCommand::Halt { reason, context } => self.halt(reason, context).await,
            SessionCommand::Resume => self.resume().await,
            SessionCommand::RetryExit { position_id, reply } => {
                let _ = reply.send(self.retry_exit(&position_id));
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Reset { capital, reply } => {
                let result = self.reset(capital).await;
                let _ = reply.send(result);
            }
            SessionCommand::Shutdown(reply) => {
                let report = self.shutdown();
                let _ = reply.send(report.clone());
                return Some(report);
            }
        }
        None
    }

    // ---------------------------------------------------------------------
    // Entries
    // ---------------------------------------------------------------------

    async fn handle_signal(&mut self, signal: Signal) -> SignalOutcome {
        let instrument = signal.instrument.clone();
        let result = match self.entry_gate() {
            Ok(()) => match self.resolve_price(&signal).await {
                Ok(price) => self.session.admit(&signal, price),
                Err(reason) => Err(reason),
            },
            Err(reason) => Err(reason),
        };

        match result {
            Ok(admission) => {
                let (cancel_tx, cancel_rx) = oneshot::channel();
                self.entry_cancels
                    .insert(admission.position_id.clone(), cancel_tx);
                self.lifecycle.spawn_entry(
                    admission.position_id.clone(),
                    admission.entry_order,
                    cancel_rx,
                );
                SignalOutcome::Accepted {
                    position_id: admission.position_id,
                    allocation: admission.allocation,
                }
            }
            Err(reason) => {
                info!(%instrument, %reason, "signal rejected");
                SignalOutcome::rejected(reason)
            }
        }
    }

    fn entry_gate(&self) -> std::result::Result<(), RejectReason> {
        if self.emergency.is_stopped() {
            return Err(RejectReason::EntriesClosed("trading halted".into()));
        }
        if self.end_of_day {
            return Err(RejectReason::EntriesClosed("end of day".into()));
        }
        let phase = self.schedule.now_phase();
        if !phase.entries_allowed() {
            return Err(RejectReason::EntriesClosed(format!("market phase {}", phase)));
        }
        Ok(())
    }

    /// Live last price; the signal's reference price only covers
    /// non-connectivity failures
    async fn resolve_price(&mut self, signal: &Signal) -> std::result::Result<Decimal, RejectReason> {
        match self.gateway.last_price(&signal.instrument).await {
            Ok(price) => {
                self.mark_gateway(true, "").await;
                self.last_prices.insert(signal.instrument.clone(), price);
                Ok(price)
            }
            Err(GatewayError::Unavailable(msg)) => {
                self.mark_gateway(false, &msg).await;
                Err(RejectReason::GatewayUnavailable(msg))
            }
            Err(e) => {
                warn!(instrument = %signal.instrument, "last price lookup failed: {}", e);
                signal.reference_price.ok_or_else(|| {
                    RejectReason::InvalidSignal(format!(
                        "no price for {}: {}",
                        signal.instrument, e
                    ))
                })
            }
        }
    }

    fn cancel_pending_entries(&mut self, reason: &str) {
        for (position_id, cancel) in self.entry_cancels.drain() {
            debug!(%position_id, reason, "cancelling pending entry");
            let _ = cancel.send(reason.to_string());
        }
    }

    // ---------------------------------------------------------------------
    // Prices and exits
    // ---------------------------------------------------------------------

    fn on_price(&mut self, instrument: &Instrument, price: Decimal) {
        self.last_prices.insert(instrument.clone(), price);
        for (position_id, reason) in self.session.exit_candidates(instrument, price) {
            info!(%position_id, %instrument, %price, %reason, "exit triggered");
            self.start_exit(&position_id, reason);
        }
    }

    async fn poll_prices(&mut self) {
        let instruments: Vec<Instrument> = self
            .session
            .book()
            .in_state(PositionState::Open)
            .into_iter()
            .map(|p| p.instrument.clone())
            .collect();

        for instrument in instruments {
            match self.gateway.last_price(&instrument).await {
                Ok(price) => {
                    self.mark_gateway(true, "").await;
                    self.on_price(&instrument, price);
                }
                Err(GatewayError::Unavailable(msg)) => {
                    self.mark_gateway(false, &msg).await;
                    break;
                }
                Err(e) => debug!(%instrument, "price poll failed: {}", e),
            }
        }
    }

    fn start_exit(&mut self, position_id: &str, reason: ExitReason) {
        match self.session.begin_exit(position_id, reason) {
            Ok(order) => self.spawn_exit_worker(position_id, order),
            Err(e) => warn!(%position_id, %reason, "cannot start exit: {}", e),
        }
    }

    fn spawn_exit_worker(&mut self, position_id: &str, order: crate::domain::OrderRequest) {
        if !self.exit_workers.insert(position_id.to_string()) {
            return;
        }
        let prior = self
            .session
            .position(position_id)
            .map(|p| p.exit_attempts)
            .unwrap_or(0);
        self.lifecycle
            .spawn_exit(position_id.to_string(), order, prior);
    }

    fn retry_exit(&mut self, position_id: &str) -> Result<()> {
        if self.exit_workers.contains(position_id) {
            return Err(BotError::Validation(format!(
                "exit already in progress for {}",
                position_id
            )));
        }
        let order = self.session.exit_order(position_id)?;
        warn!(%position_id, "operator retrying exit");
        self.spawn_exit_worker(position_id, order);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Session control
    // ---------------------------------------------------------------------

    async fn check_schedule(&mut self) {
        if !self.schedule.is_enabled() || self.end_of_day {
            return;
        }
        if self.schedule.now_phase() == MarketPhase::SquareOff {
            self.end_of_day("square-off time").await;
        }
    }

    async fn end_of_day(&mut self, trigger: &str) {
        if !self.end_of_day {
            info!(trigger, "end of day: squaring off");
            self.end_of_day = true;
        }
        self.cancel_pending_entries("end of day");
        let open: Vec<String> = self
            .session
            .book()
            .in_state(PositionState::Open)
            .into_iter()
            .map(|p| p.id.clone())
            .collect();
        for position_id in open {
            self.start_exit(&position_id, ExitReason::EndOfDay);
        }
    }

    async fn halt(&mut self, reason: EmergencyReason, context: String) {
        let first = self.emergency.trigger(reason, Some(context.clone())).await;
        self.cancel_pending_entries("trading halted");
        if first {
            self.alerts.trading_halted(&context).await;
        }
    }

    async fn resume(&mut self) {
        if !self.emergency.is_stopped() {
            return;
        }
        self.emergency.reset("session handle").await;
        if self.end_of_day {
            info!("halt lifted; entries stay closed until the session is reset");
        }
    }

    async fn reset(&mut self, capital: Option<Decimal>) -> Result<SessionReport> {
        let report = self.session.reset(capital)?;
        self.end_of_day = false;
        self.last_prices.clear();
        self.alerts.reset_rate_limits().await;
        Ok(report)
    }

    fn shutdown(&mut self) -> SessionReport {
        self.cancel_pending_entries("shutdown");
        let report = self.session.report();
        let active = self
            .session
            .book()
            .iter()
            .filter(|p| !p.state().is_terminal())
            .count();
        if active > 0 {
            warn!(active, "shutting down with positions not flat");
        }
        info!("{}", report.stats.format());
        report
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            ledger: self.session.ledger().snapshot(),
            positions: self.session.book().iter().cloned().collect(),
            halted: self.emergency.is_stopped(),
            end_of_day: self.end_of_day,
            gateway_available: self.gateway_available,
            phase: self.schedule.now_phase(),
            stats: self.session.stats(),
        }
    }

    async fn mark_gateway(&mut self, available: bool, detail: &str) {
        if self.gateway_available == available {
            return;
        }
        self.gateway_available = available;
        if available {
            info!("gateway reachable again; entries re-enabled");
        } else {
            warn!(detail, "gateway unavailable; refusing new entries");
            self.alerts.gateway_unavailable(detail).await;
        }
    }

    /// Reported fill price, else the last seen price, else the entry
    fn exit_price(&self, position_id: &str, fill_price: Option<Decimal>) -> Option<Decimal> {
        let position = self.session.position(position_id)?;
        Some(
            fill_price
                .or_else(|| self.last_prices.get(&position.instrument).copied())
                .or(position.entry_fill_price)
                .unwrap_or(position.entry_price),
        )
    }

    // ---------------------------------------------------------------------
    // Lifecycle events
    // ---------------------------------------------------------------------

    async fn handle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::EntryFilled {
                position_id,
                order_id,
                fill_price,
                filled_quantity,
            } => {
                self.entry_cancels.remove(&position_id);
                self.mark_gateway(true, "").await;
                let Some(position) = self.session.position(&position_id) else {
                    error!(%position_id, "fill for unknown position");
                    return;
                };
                let price = fill_price.unwrap_or(position.entry_price);
                let instrument = position.instrument.clone();
                let _ = self.session.set_entry_order(&position_id, &order_id);
                if let Err(e) = self.session.on_entry_filled(&position_id, price, filled_quantity) {
                    error!(%position_id, "cannot open position: {}", e);
                    return;
                }
                info!(%position_id, %instrument, %price, filled_quantity, "position open");

                if self.end_of_day {
                    self.start_exit(&position_id, ExitReason::EndOfDay);
                } else if let Some(last) = self.last_prices.get(&instrument).copied() {
                    self.on_price(&instrument, last);
                }
            }

            LifecycleEvent::EntryFailed {
                position_id,
                order_id,
                reason,
                gateway_down,
            } => {
                self.entry_cancels.remove(&position_id);
                if let Some(order_id) = &order_id {
                    let _ = self.session.set_entry_order(&position_id, order_id);
                }
                match self.session.on_entry_failed(&position_id, &reason) {
                    Ok(released) => {
                        info!(%position_id, %released, %reason, "entry discarded; capital returned")
                    }
                    Err(e) => error!(%position_id, "cannot discard entry: {}", e),
                }
                if gateway_down {
                    self.mark_gateway(false, &reason).await;
                }
            }

            LifecycleEvent::ExitSubmitted {
                position_id,
                order_id,
                attempt,
            } => {
                self.mark_gateway(true, "").await;
                let _ = self
                    .session
                    .record_exit_attempt(&position_id, attempt, Some(&order_id));
            }

            LifecycleEvent::ExitAttemptFailed {
                position_id,
                attempt,
                reason,
                gateway_down,
            } => {
                let _ = self.session.record_exit_attempt(&position_id, attempt, None);
                if gateway_down {
                    self.mark_gateway(false, &reason).await;
                }
            }

            LifecycleEvent::ExitPartiallyFilled {
                position_id,
                order_id,
                quantity,
                fill_price,
            } => {
                let Some(price) = self.exit_price(&position_id, fill_price) else {
                    error!(%position_id, "partial exit fill for unknown position");
                    return;
                };
                let _ = self
                    .session
                    .record_exit_attempt(&position_id, 0, Some(&order_id));
                if let Err(e) = self.session.on_exit_partial(&position_id, quantity, price) {
                    error!(%position_id, quantity, "cannot book partial exit: {}", e);
                }
            }

            LifecycleEvent::ExitFilled {
                position_id,
                order_id,
                fill_price,
            } => {
                self.exit_workers.remove(&position_id);
                let Some(price) = self.exit_price(&position_id, fill_price) else {
                    error!(%position_id, "exit fill for unknown position");
                    return;
                };
                let _ = self
                    .session
                    .record_exit_attempt(&position_id, 0, Some(&order_id));
                match self.session.on_exit_filled(&position_id, price) {
                    Ok(record) => {
                        info!(
                            %position_id,
                            instrument = %record.instrument,
                            exit = %record.exit_price,
                            pnl = %record.pnl,
                            "position closed"
                        );
                        self.journal.record(&record).await;
                    }
                    Err(e) => error!(%position_id, "cannot close position: {}", e),
                }
            }

            LifecycleEvent::ExitUnresolved {
                position_id,
                attempts,
                reason,
            } => {
                self.exit_workers.remove(&position_id);
                if let Err(e) = self.session.flag_unresolved(&position_id, attempts) {
                    error!(%position_id, "cannot flag position: {}", e);
                    return;
                }
                let instrument = self
                    .session
                    .position(&position_id)
                    .map(|p| p.instrument.to_string())
                    .unwrap_or_default();
                error!(%position_id, %instrument, attempts, %reason, "exit unresolved; manual intervention required");
                self.alerts
                    .exit_unresolved(&position_id, &instrument, attempts, &reason)
                    .await;
            }
        }
    }
}
