//! Order tracking tasks.
//!
//! Entry and exit orders are followed in spawned tasks so the session loop
//! never blocks on the gateway. Workers only talk to the gateway and report
//! `LifecycleEvent`s; they never touch the ledger or the position book.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::LifecycleEvent;
use crate::config::ExecutionConfig;
use crate::domain::{OrderReport, OrderRequest, OrderStatus};
use crate::exchange::{GatewayError, GatewayResult, OrderGateway};

/// Why an exit attempt did not flatten the position
struct AttemptFailure {
    reason: String,
    gateway_down: bool,
}

impl From<GatewayError> for AttemptFailure {
    fn from(err: GatewayError) -> Self {
        Self {
            gateway_down: matches!(err, GatewayError::Unavailable(_)),
            reason: err.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct OrderLifecycle {
    gateway: Arc<dyn OrderGateway>,
    config: ExecutionConfig,
    events: mpsc::Sender<LifecycleEvent>,
}

impl OrderLifecycle {
    pub fn new(
        gateway: Arc<dyn OrderGateway>,
        config: ExecutionConfig,
        events: mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            gateway,
            config,
            events,
        }
    }

    /// Place the entry and report its outcome. Sending on (or dropping)
    /// `cancel` abandons the entry.
    pub fn spawn_entry(
        &self,
        position_id: String,
        request: OrderRequest,
        cancel: oneshot::Receiver<String>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let event = this.track_entry(&position_id, &request, cancel).await;
            this.emit(event).await;
        })
    }

    /// Flatten a position, retrying until filled or out of time
    pub fn spawn_exit(
        &self,
        position_id: String,
        request: OrderRequest,
        prior_attempts: u32,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let event = this.run_exit(&position_id, &request, prior_attempts).await;
            this.emit(event).await;
        })
    }

    async fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session loop gone; dropping lifecycle event");
        }
    }

    pub async fn track_entry(
        &self,
        position_id: &str,
        request: &OrderRequest,
        mut cancel: oneshot::Receiver<String>,
    ) -> LifecycleEvent {
        let order_id = match self.gateway.place_order(request).await {
            Ok(order_id) => order_id,
            Err(e) => {
                warn!(position_id, instrument = %request.instrument, "entry order failed: {}", e);
                return LifecycleEvent::EntryFailed {
                    position_id: position_id.to_string(),
                    order_id: None,
                    gateway_down: matches!(e, GatewayError::Unavailable(_)),
                    reason: e.to_string(),
                };
            }
        };
        debug!(position_id, %order_id, "entry order placed");

        let abandon = tokio::select! {
            waited = timeout(self.config.order_timeout(), self.wait_for_fill(&order_id)) => {
                match waited {
                    Ok(Ok(report)) => return self.entry_outcome(position_id, request, report),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!(
                        "entry not filled within {}ms",
                        self.config.order_timeout_ms
                    ),
                }
            }
            why = &mut cancel => why.unwrap_or_else(|_| "session closed".to_string()),
        };

        warn!(position_id, %order_id, reason = %abandon, "cancelling entry order");
        if let Err(e) = self.gateway.cancel_order(&order_id).await {
            warn!(%order_id, "cancel failed: {}", e);
        }

        // The order may have filled while we were giving up on it
        match self.gateway.order_status(&order_id).await {
            Ok(report) if report.filled_quantity > 0 || report.status == OrderStatus::Filled => {
                self.entry_outcome(position_id, request, report)
            }
            Ok(_) => LifecycleEvent::EntryFailed {
                position_id: position_id.to_string(),
                order_id: Some(order_id),
                reason: abandon,
                gateway_down: false,
            },
            Err(e) => {
                error!(%order_id, "final entry status unknown: {}", e);
                LifecycleEvent::EntryFailed {
                    position_id: position_id.to_string(),
                    order_id: Some(order_id),
                    reason: format!("{}; final status unknown: {}", abandon, e),
                    gateway_down: matches!(e, GatewayError::Unavailable(_)),
                }
            }
        }
    }

    fn entry_outcome(
        &self,
        position_id: &str,
        request: &OrderRequest,
        report: OrderReport,
    ) -> LifecycleEvent {
        let filled_quantity = match report.status {
            OrderStatus::Filled if report.filled_quantity == 0 => request.quantity,
            _ => report.filled_quantity,
        };
        if filled_quantity > 0 {
            info!(
                position_id,
                order_id = %report.order_id,
                filled_quantity,
                price = ?report.average_price,
                "entry filled"
            );
            return LifecycleEvent::EntryFilled {
                position_id: position_id.to_string(),
                order_id: report.order_id,
                fill_price: report.average_price,
                filled_quantity,
            };
        }
        let reason = report
            .message
            .clone()
            .unwrap_or_else(|| format!("entry order {}", report.status));
        warn!(position_id, order_id = %report.order_id, %reason, "entry not filled");
        LifecycleEvent::EntryFailed {
            position_id: position_id.to_string(),
            order_id: Some(report.order_id),
            reason,
            gateway_down: false,
        }
    }

    /// Exit loop: a fresh market order per attempt, exponential backoff
    /// between attempts, bounded by the exit deadline and attempt budget.
    /// Each partial fill is reported as it happens and shrinks the next
    /// attempt; `ExitFilled` carries the price of the order that finished.
    pub async fn run_exit(
        &self,
        position_id: &str,
        template: &OrderRequest,
        prior_attempts: u32,
    ) -> LifecycleEvent {
        let started = Instant::now();
        let deadline = self.config.exit_deadline();
        let mut attempt = prior_attempts;
        let mut tries = 0u32;
        let mut remaining = template.quantity;
        let mut last_order_id = String::new();

        loop {
            attempt += 1;
            tries += 1;
            let request = OrderRequest {
                client_order_id: Uuid::new_v4().to_string(),
                quantity: remaining,
                ..template.clone()
            };

            let failure = match self.gateway.place_order(&request).await {
                Ok(order_id) => {
                    info!(position_id, %order_id, attempt, quantity = remaining, "exit order placed");
                    last_order_id = order_id.clone();
                    self.emit(LifecycleEvent::ExitSubmitted {
                        position_id: position_id.to_string(),
                        order_id: order_id.clone(),
                        attempt,
                    })
                    .await;

                    let report = self.await_exit(&order_id).await;
                    if let Ok(report) = &report {
                        let qty = match report.status {
                            OrderStatus::Filled if report.filled_quantity == 0 => remaining,
                            _ => report.filled_quantity.min(remaining),
                        };
                        if qty == remaining {
                            return LifecycleEvent::ExitFilled {
                                position_id: position_id.to_string(),
                                order_id,
                                fill_price: report.average_price,
                            };
                        }
                        if qty > 0 {
                            remaining -= qty;
                            warn!(position_id, %order_id, filled = qty, remaining, "partial exit fill");
                            self.emit(LifecycleEvent::ExitPartiallyFilled {
                                position_id: position_id.to_string(),
                                order_id: order_id.clone(),
                                quantity: qty,
                                fill_price: report.average_price,
                            })
                            .await;
                        }
                    }
                    match report {
                        Ok(report) => AttemptFailure {
                            reason: report
                                .message
                                .unwrap_or_else(|| format!("exit order {}", report.status)),
                            gateway_down: false,
                        },
                        Err(e) => e.into(),
                    }
                }
                Err(e) => e.into(),
            };

            let elapsed = started.elapsed();
            if tries >= self.config.max_exit_attempts || elapsed >= deadline {
                error!(
                    position_id,
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    last_order = %last_order_id,
                    "exit unresolved: {}",
                    failure.reason
                );
                return LifecycleEvent::ExitUnresolved {
                    position_id: position_id.to_string(),
                    attempts: attempt,
                    reason: failure.reason,
                };
            }

            warn!(position_id, attempt, "exit attempt failed: {}. Retrying...", failure.reason);
            self.emit(LifecycleEvent::ExitAttemptFailed {
                position_id: position_id.to_string(),
                attempt,
                reason: failure.reason,
                gateway_down: failure.gateway_down,
            })
            .await;

            let delay = self.config.exit_backoff(tries).min(deadline - elapsed);
            sleep(delay).await;
        }
    }

    /// Terminal report of one exit order; cancels it if it hangs
    async fn await_exit(&self, order_id: &str) -> GatewayResult<OrderReport> {
        match timeout(self.config.order_timeout(), self.wait_for_fill(order_id)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) if !e.is_transient() => Err(e),
            waited => {
                let reason = match waited {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("exit not filled within {}ms", self.config.order_timeout_ms),
                };
                warn!(%order_id, %reason, "cancelling exit order");
                let _ = self.gateway.cancel_order(order_id).await;
                let report = self.gateway.order_status(order_id).await?;
                if report.filled_quantity == 0 && report.status != OrderStatus::Filled {
                    return Err(GatewayError::Timeout(reason));
                }
                Ok(report)
            }
        }
    }

    /// Poll until the order reaches a terminal status
    async fn wait_for_fill(&self, order_id: &str) -> GatewayResult<OrderReport> {
        loop {
            match self.gateway.order_status(order_id).await {
                Ok(report) if report.status.is_terminal() => return Ok(report),
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    debug!(%order_id, "status poll failed: {}", e);
                }
                Err(e) => return Err(e),
            }
            sleep(self.config.poll_interval()).await;
        }
    }
}
