pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod strategy;
pub mod supervisor;

pub use config::AppConfig;
pub use coordination::{EmergencyReason, EmergencyStop, MarketPhase, MarketSchedule};
pub use coordinator::{
    drive_signals, SessionCoordinator, SessionHandle, SessionReport, SessionSnapshot,
    SignalOutcome,
};
pub use error::{BotError, RejectReason, Result};
pub use exchange::{build_gateway, GatewayKind, KiteGateway, OrderGateway, PaperGateway};
pub use supervisor::{AlertLevel, AlertManager, AlertManagerConfig};
