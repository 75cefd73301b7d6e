//! Full-stop switch.
//!
//! While active no new entries are taken. Open positions keep their stops and
//! targets; pending entries are cancelled by the session when it trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::{BotError, Result};

/// Emergency stop reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmergencyReason {
    /// Manual trigger by operator
    Manual,
    /// Process shutting down
    Shutdown,
    Other(String),
}

impl std::fmt::Display for EmergencyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyReason::Manual => write!(f, "Manual"),
            EmergencyReason::Shutdown => write!(f, "Shutdown"),
            EmergencyReason::Other(s) => write!(f, "Other: {}", s),
        }
    }
}

/// Emergency stop state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyState {
    pub active: bool,
    pub reason: Option<EmergencyReason>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub context: Option<String>,
}

/// Shared halt flag; clones observe the same state
#[derive(Clone, Default)]
pub struct EmergencyStop {
    state: Arc<RwLock<EmergencyState>>,
    is_stopped: Arc<AtomicBool>,
}

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast atomic check
    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> EmergencyState {
        self.state.read().await.clone()
    }

    /// Returns false if it was already active
    pub async fn trigger(&self, reason: EmergencyReason, context: Option<String>) -> bool {
        let was_stopped = self.is_stopped.swap(true, Ordering::SeqCst);
        if was_stopped {
            return false;
        }
        error!("EMERGENCY STOP TRIGGERED: {} - {:?}", reason, context);

        let mut state = self.state.write().await;
        state.active = true;
        state.reason = Some(reason);
        state.triggered_at = Some(Utc::now());
        state.context = context;
        true
    }

    pub async fn reset(&self, operator: &str) {
        info!("Resetting emergency stop (operator: {})", operator);
        self.is_stopped.store(false, Ordering::SeqCst);
        *self.state.write().await = EmergencyState::default();
    }

    /// Error out if trading is halted
    pub async fn check_allowed(&self) -> Result<()> {
        if !self.is_stopped() {
            return Ok(());
        }
        let state = self.state.read().await;
        let reason = state
            .reason
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        Err(BotError::Halted(reason))
    }
}
