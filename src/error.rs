use thiserror::Error;

use crate::exchange::GatewayError;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    // Allocation errors
    #[error("Allocation rejected: {0}")]
    AllocationRejected(RejectReason),

    // Order execution errors
    #[error("Entry order failed: {0}")]
    EntryOrderFailed(String),

    #[error("Exit order failed for position {position_id} after {attempts} attempts: {reason}")]
    ExitOrderFailed {
        position_id: String,
        attempts: u32,
        reason: String,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    // Session errors
    #[error("Trading halted: {0}")]
    Halted(String),

    #[error("Session channel closed: {0}")]
    ChannelClosed(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Why the allocator (or the session around it) refused a signal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("confidence {confidence} below minimum {minimum}")]
    LowConfidence {
        confidence: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("max concurrent positions reached ({open}/{max})")]
    MaxPositionsReached { open: u32, max: u32 },

    #[error("insufficient capital: slot budget {budget} cannot buy one share at {price}")]
    InsufficientCapital {
        budget: rust_decimal::Decimal,
        price: rust_decimal::Decimal,
    },

    #[error("insufficient free capital: {free} free, {required} required")]
    CapitalExhausted {
        free: rust_decimal::Decimal,
        required: rust_decimal::Decimal,
    },

    #[error("per-trade risk {risk} exceeds limit {limit}")]
    RiskLimitExceeded {
        risk: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },

    #[error("already holding {0}")]
    DuplicateInstrument(String),

    #[error("entries closed: {0}")]
    EntriesClosed(String),

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),
}

impl From<GatewayError> for BotError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => BotError::GatewayUnavailable(msg),
            other => BotError::Gateway(other),
        }
    }
}

impl From<RejectReason> for BotError {
    fn from(reason: RejectReason) -> Self {
        BotError::AllocationRejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unavailable_gateway_maps_to_dedicated_variant() {
        let err: BotError = GatewayError::Unavailable("connect refused".into()).into();
        assert!(matches!(err, BotError::GatewayUnavailable(_)));

        let err: BotError = GatewayError::Rejected("margin".into()).into();
        assert!(matches!(err, BotError::Gateway(GatewayError::Rejected(_))));
    }

    #[test]
    fn reject_reason_renders_context() {
        let err: BotError = RejectReason::MaxPositionsReached { open: 4, max: 4 }.into();
        assert_eq!(
            err.to_string(),
            "Allocation rejected: max concurrent positions reached (4/4)"
        );

        let reason = RejectReason::RiskLimitExceeded {
            risk: dec!(150),
            limit: dec!(100),
        };
        assert!(reason.to_string().contains("150"));
    }
}
