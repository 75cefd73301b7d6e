pub mod webhook;

pub use webhook::{WebhookFormat, WebhookNotifier};
