use async_trait::async_trait;
use std::sync::Arc;
use tokio::signal;
use tracing::error;
use tracing_subscriber::EnvFilter;

use zerobot::config::LoggingConfig;
use zerobot::domain::Signal;
use zerobot::exchange::PaperGateway;
use zerobot::strategy::SignalSource;

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},zerobot=debug", logging.level)));

    // Daily rotating file only when ZEROBOT_LOG_DIR is set and writable.
    // `rolling::daily` panics if it cannot create the first file.
    let log_dir = std::env::var("ZEROBOT_LOG_DIR").ok();
    let file_layer = log_dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let probe = std::path::Path::new(dir).join(".zerobot_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                let file_appender = tracing_appender::rolling::daily(dir, "zerobot.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
                None
            }
        }
    });

    let (json_layer, text_layer) = if logging.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/zerobot.log", dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Paper sessions have no market feed: each signal's reference price becomes
/// the simulated last price before the signal is handed on.
pub struct PaperPriceSeeder {
    inner: Box<dyn SignalSource>,
    paper: Arc<PaperGateway>,
}

impl PaperPriceSeeder {
    pub fn new(inner: Box<dyn SignalSource>, paper: Arc<PaperGateway>) -> Self {
        Self { inner, paper }
    }
}

#[async_trait]
impl SignalSource for PaperPriceSeeder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn next_signal(&mut self) -> Option<Signal> {
        let signal = self.inner.next_signal().await?;
        if let Some(price) = signal.reference_price {
            self.paper.set_price(&signal.instrument, price).await;
        }
        Some(signal)
    }
}
