//! Chat webhook notifications
//!
//! Posts alert text to a Feishu/Lark bot or any Slack-compatible incoming
//! webhook.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    /// `{"msg_type":"text","content":{"text":...}}`
    Feishu,
    /// `{"text":...}`
    Slack,
}

impl WebhookFormat {
    pub fn detect(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("feishu") || url.contains("larksuite") {
            WebhookFormat::Feishu
        } else {
            WebhookFormat::Slack
        }
    }
}

#[derive(Serialize)]
struct FeishuMessage<'a> {
    msg_type: &'static str,
    content: FeishuContent<'a>,
}

#[derive(Serialize)]
struct FeishuContent<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    format: WebhookFormat,
}

impl WebhookNotifier {
    /// Create a notifier from `ZEROBOT_WEBHOOK_URL`
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("ZEROBOT_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                info!("Webhook notifications enabled");
                Self::new(url)
            })
    }

    pub fn new(webhook_url: String) -> Arc<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            format: WebhookFormat::detect(&webhook_url),
            webhook_url,
        })
    }

    pub fn format(&self) -> WebhookFormat {
        self.format
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        let value = match self.format {
            WebhookFormat::Feishu => serde_json::to_value(FeishuMessage {
                msg_type: "text",
                content: FeishuContent { text },
            }),
            WebhookFormat::Slack => serde_json::to_value(SlackMessage { text }),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Send a text message
    pub async fn send_message(&self, text: &str) -> Result<(), String> {
        match self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(text))
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook notification sent successfully");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("Webhook notification failed: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("Webhook request failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_payload_shape_from_url() {
        let feishu = WebhookNotifier::new(
            "https://open.feishu.cn/open-apis/bot/v2/hook/abc".to_string(),
        );
        assert_eq!(feishu.format(), WebhookFormat::Feishu);
        let payload = feishu.payload("hello");
        assert_eq!(payload["msg_type"], "text");
        assert_eq!(payload["content"]["text"], "hello");

        let slack = WebhookNotifier::new("https://hooks.slack.com/services/x".to_string());
        assert_eq!(slack.format(), WebhookFormat::Slack);
        assert_eq!(slack.payload("hi")["text"], "hi");
    }
}
