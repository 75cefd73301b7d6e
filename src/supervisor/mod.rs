//! Supervisor layer
//!
//! Rate-limited operator alerts, optionally forwarded to a chat webhook.

pub mod alert_manager;

pub use alert_manager::{Alert, AlertLevel, AlertManager, AlertManagerConfig};
