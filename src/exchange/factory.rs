use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{BotError, Result};

use super::{GatewayKind, KiteGateway, OrderGateway, PaperGateway};

/// Paper broker funded with `gateway.paper_capital` (or the session capital)
pub fn build_paper_gateway(app_config: &AppConfig) -> Arc<PaperGateway> {
    let cash = app_config
        .gateway
        .paper_capital
        .unwrap_or(app_config.capital.total_capital);
    Arc::new(PaperGateway::new(cash))
}

/// Create the runtime gateway from `AppConfig`.
pub fn build_gateway(app_config: &AppConfig) -> Result<Arc<dyn OrderGateway>> {
    let gateway = &app_config.gateway;
    match gateway.kind {
        GatewayKind::Paper => Ok(build_paper_gateway(app_config)),
        GatewayKind::Kite => {
            let api_key = gateway
                .api_key
                .as_deref()
                .ok_or_else(|| BotError::Validation("gateway.api_key is required".into()))?;
            let access_token = gateway
                .access_token
                .as_deref()
                .ok_or_else(|| BotError::Validation("gateway.access_token is required".into()))?;
            let client = KiteGateway::new(
                gateway.base_url.as_deref(),
                api_key,
                access_token,
                Duration::from_millis(gateway.request_timeout_ms),
            )?;
            Ok(Arc::new(client))
        }
    }
}
