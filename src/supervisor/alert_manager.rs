//! Alert Manager
//!
//! Routes alerts by severity to the log, local subscribers and an optional
//! chat webhook. Includes rate limiting to prevent alert storms; rate limits
//! only affect the webhook, never logging or subscribers. Critical alerts are
//! never rate limited. Webhook delivery runs on its own task so raising an
//! alert never waits on the network.

use crate::adapters::WebhookNotifier;
use crate::config::AlertConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const HISTORY_LIMIT: usize = 500;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational - log only
    Info,
    /// Warning - webhook notification
    Warning,
    /// Error - webhook notification
    Error,
    /// Critical - needs an operator now
    Critical,
}

impl AlertLevel {
    /// Get emoji prefix for alert level
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{274c}",
            AlertLevel::Critical => "\u{1f6a8}",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert payload
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    /// What the alert is about (e.g. a position id); part of the dedup key
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata: None,
            subject: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    /// Format for a chat message
    pub fn format_text(&self) -> String {
        format!(
            "{} {}\n\nComponent: {}\nTime: {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.component,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

/// Configuration for alert manager
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// Minimum interval between duplicate alerts (default: 60s)
    pub rate_limit_secs: u64,
    /// Whether to send alerts for info level (default: false)
    pub notify_info: bool,
    /// Maximum alerts per minute before throttling (default: 10)
    pub max_alerts_per_minute: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            notify_info: false,
            max_alerts_per_minute: 10,
        }
    }
}

impl From<&AlertConfig> for AlertManagerConfig {
    fn from(cfg: &AlertConfig) -> Self {
        Self {
            rate_limit_secs: cfg.rate_limit_secs,
            notify_info: cfg.notify_info,
            max_alerts_per_minute: cfg.max_alerts_per_minute,
        }
    }
}

#[derive(Debug)]
struct RateLimitState {
    last_sent: DateTime<Utc>,
    suppressed_count: u32,
}

/// Alert Manager for coordinating notifications
pub struct AlertManager {
    config: AlertManagerConfig,
    webhook: Option<Arc<WebhookNotifier>>,
    rate_limits: Arc<RwLock<HashMap<String, RateLimitState>>>,
    alerts_this_minute: Arc<RwLock<Vec<DateTime<Utc>>>>,
    history: Arc<RwLock<Vec<Alert>>>,
    event_tx: tokio::sync::broadcast::Sender<Alert>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        let (event_tx, _) = tokio::sync::broadcast::channel(64);
        Self {
            config,
            webhook: None,
            rate_limits: Arc::new(RwLock::new(HashMap::new())),
            alerts_this_minute: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            event_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AlertManagerConfig::default())
    }

    /// Build from `[alerts]`, wiring the webhook when a URL is configured
    pub fn from_config(cfg: &AlertConfig) -> Self {
        let manager = Self::new(AlertManagerConfig::from(cfg));
        match cfg.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => manager.with_webhook(WebhookNotifier::new(url.to_string())),
            None => match WebhookNotifier::from_env() {
                Some(webhook) => manager.with_webhook(webhook),
                None => manager,
            },
        }
    }

    pub fn with_webhook(mut self, webhook: Arc<WebhookNotifier>) -> Self {
        info!(format = ?webhook.format(), "Alert webhook configured");
        self.webhook = Some(webhook);
        self
    }

    pub fn webhook_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    fn rate_limit_key(alert: &Alert) -> String {
        match alert.subject {
            Some(ref subject) => format!(
                "{}:{}:{}:{}",
                alert.component, alert.level, alert.title, subject
            ),
            None => format!("{}:{}:{}", alert.component, alert.level, alert.title),
        }
    }

    async fn should_rate_limit(&self, alert: &Alert) -> bool {
        let key = Self::rate_limit_key(alert);
        let now = Utc::now();

        let mut limits = self.rate_limits.write().await;

        if let Some(state) = limits.get_mut(&key) {
            let elapsed = now.signed_duration_since(state.last_sent).num_seconds().max(0) as u64;
            if elapsed < self.config.rate_limit_secs {
                state.suppressed_count += 1;
                debug!(
                    "Rate limiting alert '{}' ({} suppressed)",
                    alert.title, state.suppressed_count
                );
                return true;
            }

            state.last_sent = now;
            state.suppressed_count = 0;
        } else {
            limits.insert(
                key,
                RateLimitState {
                    last_sent: now,
                    suppressed_count: 0,
                },
            );
        }

        false
    }

    /// Global alerts-per-minute cap
    async fn is_throttled(&self) -> bool {
        let now = Utc::now();
        let minute_ago = now - chrono::Duration::minutes(1);

        let mut alerts = self.alerts_this_minute.write().await;
        alerts.retain(|t| *t > minute_ago);

        if alerts.len() >= self.config.max_alerts_per_minute as usize {
            warn!(
                "Alert throttling: {} alerts in last minute (max: {})",
                alerts.len(),
                self.config.max_alerts_per_minute
            );
            return true;
        }

        alerts.push(now);
        false
    }

    pub async fn alert(&self, alert: Alert) {
        let _ = self.event_tx.send(alert.clone());

        match alert.level {
            AlertLevel::Info => info!("[{}] {}: {}", alert.component, alert.title, alert.message),
            AlertLevel::Warning => {
                warn!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Error => {
                error!("[{}] {}: {}", alert.component, alert.title, alert.message)
            }
            AlertLevel::Critical => {
                error!(
                    "CRITICAL [{}] {}: {}",
                    alert.component, alert.title, alert.message
                )
            }
        }

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_LIMIT {
                history.remove(0);
            }
            history.push(alert.clone());
        }

        if !self.should_deliver(&alert).await {
            return;
        }

        if let Some(ref webhook) = self.webhook {
            let webhook = Arc::clone(webhook);
            let text = alert.format_text();
            tokio::spawn(async move {
                if let Err(e) = webhook.send_message(&text).await {
                    error!("Failed to send webhook alert: {}", e);
                }
            });
        }
    }

    /// Whether an alert passes the level filter and the rate limiters
    async fn should_deliver(&self, alert: &Alert) -> bool {
        match alert.level {
            AlertLevel::Info if !self.config.notify_info => return false,
            AlertLevel::Critical => return true,
            _ => {}
        }

        if self.should_rate_limit(alert).await {
            return false;
        }

        !self.is_throttled().await
    }

    pub async fn info(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Info, component, title, message))
            .await;
    }

    pub async fn warning(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Warning, component, title, message))
            .await;
    }

    pub async fn error(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Error, component, title, message))
            .await;
    }

    pub async fn critical(&self, component: &str, title: &str, message: &str) {
        self.alert(Alert::new(AlertLevel::Critical, component, title, message))
            .await;
    }

    /// An exit could not be confirmed; the position is still live at the broker
    pub async fn exit_unresolved(
        &self,
        position_id: &str,
        instrument: &str,
        attempts: u32,
        reason: &str,
    ) {
        self.alert(
            Alert::new(
                AlertLevel::Critical,
                "lifecycle",
                "Exit Order Unresolved",
                &format!(
                    "Could not flatten {} (position {}) after {} attempts: {}",
                    instrument, position_id, attempts, reason
                ),
            )
            .with_subject(position_id)
            .with_metadata(serde_json::json!({
                "action": "manual_intervention_required",
                "position_id": position_id,
                "instrument": instrument,
                "attempts": attempts,
            })),
        )
        .await;
    }

    pub async fn gateway_unavailable(&self, error: &str) {
        self.alert(
            Alert::new(
                AlertLevel::Error,
                "gateway",
                "Gateway Unavailable",
                &format!("New entries paused: {}", error),
            )
            .with_metadata(serde_json::json!({ "action": "entries_paused" })),
        )
        .await;
    }

    pub async fn trading_halted(&self, reason: &str) {
        self.alert(
            Alert::new(AlertLevel::Warning, "session", "Trading Halted", reason)
                .with_metadata(serde_json::json!({ "action": "entries_blocked" })),
        )
        .await;
    }

    /// Alerts seen this process, oldest first
    pub async fn recent_alerts(&self) -> Vec<Alert> {
        self.history.read().await.clone()
    }

    pub async fn get_suppressed_counts(&self) -> HashMap<String, u32> {
        let limits = self.rate_limits.read().await;
        limits
            .iter()
            .filter(|(_, state)| state.suppressed_count > 0)
            .map(|(key, state)| (key.clone(), state.suppressed_count))
            .collect()
    }

    /// Reset rate limits (call daily)
    pub async fn reset_rate_limits(&self) {
        let mut limits = self.rate_limits.write().await;
        limits.clear();
        debug!("Alert rate limits reset");
    }
}
