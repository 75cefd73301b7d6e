//! Kite Connect v3 REST gateway.
//!
//! Only the four calls the trading core needs: place, status, cancel, LTP.
//! The access token is taken as already issued; no login flow here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GatewayError, GatewayKind, GatewayResult, OrderGateway};
use crate::domain::{Instrument, OrderReport, OrderRequest, OrderStatus, OrderType};
use crate::error::{BotError, Result};

pub const DEFAULT_KITE_API_BASE: &str = "https://api.kite.trade";
const KITE_VERSION: &str = "3";

#[derive(Clone)]
pub struct KiteGateway {
    http: Client,
    base_url: String,
}

impl KiteGateway {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        access_token: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_KITE_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert("x-kite-version", HeaderValue::from_static(KITE_VERSION));
        let auth = format!("token {}:{}", api_key, access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| BotError::Validation(format!("invalid Kite credentials: {}", e)))?,
        );

        let http = Client::builder()
            .user_agent("zerobot/0.1")
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build Kite HTTP client: {}", e)))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: Option<&[(&str, String)]>,
    ) -> GatewayResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(form) = form {
            req = req.form(form);
        }

        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        debug!(%method, path, status = status.as_u16(), "kite response");

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                if status.is_success() {
                    GatewayError::Protocol(format!("invalid Kite JSON: {}", e))
                } else {
                    classify_error(status, None, &text)
                }
            })?
        };

        if !status.is_success() || body.get("status").and_then(Value::as_str) == Some("error") {
            let error_type = body.get("error_type").and_then(Value::as_str);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(text.as_str());
            return Err(classify_error(status, error_type, message));
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| GatewayError::Protocol(format!("missing data in {} {}", method, path)))
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Map a Kite error response onto the gateway error kinds
pub(crate) fn classify_error(
    status: StatusCode,
    error_type: Option<&str>,
    message: &str,
) -> GatewayError {
    match error_type {
        Some("OrderException") | Some("InputException") | Some("MarginException")
        | Some("PermissionException") => GatewayError::Rejected(message.to_string()),
        Some("NetworkException") | Some("DataException") | Some("TokenException") => {
            GatewayError::Unavailable(message.to_string())
        }
        _ if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            GatewayError::Unavailable(format!("HTTP {}: {}", status.as_u16(), message))
        }
        _ if status == StatusCode::BAD_REQUEST => GatewayError::Rejected(message.to_string()),
        _ => GatewayError::Protocol(format!("HTTP {}: {}", status.as_u16(), message)),
    }
}

pub(crate) fn parse_decimalish(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str_exact(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str_exact(&n.to_string()).ok(),
        _ => None,
    }
}

pub(crate) fn map_status(raw: &str) -> OrderStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "COMPLETE" => OrderStatus::Filled,
        "REJECTED" => OrderStatus::Rejected,
        "CANCELLED" => OrderStatus::Cancelled,
        "OPEN" | "TRIGGER PENDING" | "AMO REQ RECEIVED" => OrderStatus::Open,
        _ => OrderStatus::Pending,
    }
}

/// Latest entry of a Kite order history list
pub(crate) fn parse_order_history(order_id: &str, data: &Value) -> GatewayResult<OrderReport> {
    let latest = data
        .as_array()
        .and_then(|h| h.last())
        .ok_or_else(|| GatewayError::Protocol(format!("empty history for order {}", order_id)))?;

    let status = latest
        .get("status")
        .and_then(Value::as_str)
        .map(map_status)
        .ok_or_else(|| GatewayError::Protocol("order history entry without status".into()))?;
    let filled_quantity = latest
        .get("filled_quantity")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let average_price = latest
        .get("average_price")
        .and_then(parse_decimalish)
        .filter(|p| *p > Decimal::ZERO);
    let message = latest
        .get("status_message")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Ok(OrderReport {
        order_id: order_id.to_string(),
        status,
        filled_quantity,
        average_price,
        message,
    })
}

fn order_form(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("tradingsymbol", request.instrument.symbol.clone()),
        ("exchange", request.instrument.exchange.as_str().to_string()),
        ("transaction_type", request.side.as_str().to_string()),
        ("order_type", request.order_type.as_str().to_string()),
        ("quantity", request.quantity.to_string()),
        ("product", request.product.as_str().to_string()),
        ("validity", "DAY".to_string()),
        ("tag", request.client_order_id.chars().take(20).collect()),
    ];
    if let (OrderType::Limit, Some(price)) = (request.order_type, request.limit_price) {
        form.push(("price", price.to_string()));
    }
    form
}

#[async_trait]
impl OrderGateway for KiteGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Kite
    }

    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<String> {
        let form = order_form(request);
        let data = self
            .request(Method::POST, "/orders/regular", &[], Some(form.as_slice()))
            .await?;
        data.get("order_id")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| GatewayError::Protocol("order placed without order_id".into()))
    }

    async fn order_status(&self, order_id: &str) -> GatewayResult<OrderReport> {
        let path = format!("/orders/{}", order_id);
        let data = self.request(Method::GET, &path, &[], None).await?;
        parse_order_history(order_id, &data)
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<bool> {
        let path = format!("/orders/regular/{}", order_id);
        match self.request(Method::DELETE, &path, &[], None).await {
            Ok(_) => Ok(true),
            Err(GatewayError::Rejected(msg)) => {
                warn!(order_id, "kite refused cancel: {}", msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn last_price(&self, instrument: &Instrument) -> GatewayResult<Decimal> {
        let key = instrument.key();
        let data = self
            .request(Method::GET, "/quote/ltp", &[("i", key.clone())], None)
            .await?;
        data.get(&key)
            .and_then(|q| q.get("last_price"))
            .and_then(parse_decimalish)
            .ok_or_else(|| GatewayError::Protocol(format!("no last_price for {}", key)))
    }
}
