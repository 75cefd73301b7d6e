pub mod factory;
pub mod kite;
pub mod paper;
mod traits;

pub use factory::{build_gateway, build_paper_gateway};
pub use kite::KiteGateway;
pub use paper::{FillMode, PaperGateway};
pub use traits::{parse_gateway_kind, GatewayError, GatewayKind, GatewayResult, OrderGateway};

#[cfg(test)]
pub use traits::MockOrderGateway;
