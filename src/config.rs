use chrono::NaiveTime;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::exchange::GatewayKind;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub capital: CapitalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    /// Capital the session may deploy, in rupees
    pub total_capital: Decimal,
    /// Maximum concurrent positions (open + pending)
    pub max_positions: u32,
    /// Fraction of session capital one trade may lose at its stop (e.g., 0.02 = 2%)
    pub risk_per_trade: Decimal,
    /// Stop-loss distance from entry (e.g., 0.015 = 1.5%)
    pub stop_loss_pct: Decimal,
    /// Target distance from entry (e.g., 0.03 = 3%)
    pub target_pct: Decimal,
    /// Signals below this confidence are ignored
    pub min_confidence: Decimal,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            total_capital: dec!(5000),
            max_positions: 5,
            risk_per_trade: dec!(0.02),
            stop_loss_pct: dec!(0.015),
            target_pct: dec!(0.03),
            min_confidence: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long an entry order may stay unfilled before it is cancelled
    pub order_timeout_ms: u64,
    /// Polling interval for order status in milliseconds
    pub poll_interval_ms: u64,
    /// Polling interval for last prices of open positions
    pub price_poll_ms: u64,
    /// Give up retrying an exit after this long
    pub exit_deadline_ms: u64,
    /// First exit retry delay; doubles per attempt
    pub exit_retry_base_ms: u64,
    /// Give up retrying an exit after this many attempts
    pub max_exit_attempts: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: 10_000,
            poll_interval_ms: 500,
            price_poll_ms: 30_000,
            exit_deadline_ms: 60_000,
            exit_retry_base_ms: 500,
            max_exit_attempts: 8,
        }
    }
}

impl ExecutionConfig {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn price_poll(&self) -> Duration {
        Duration::from_millis(self.price_poll_ms)
    }

    pub fn exit_deadline(&self) -> Duration {
        Duration::from_millis(self.exit_deadline_ms)
    }

    /// Delay before exit attempt `attempt + 1` (base doubled per failure)
    pub fn exit_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.exit_retry_base_ms.saturating_mul(1u64 << shift))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Gate entries and square-off on the exchange clock
    pub enabled: bool,
    /// Local market open (HH:MM)
    pub market_open: String,
    /// No new entries after this time (HH:MM)
    pub entry_cutoff: String,
    /// Force-close everything at this time (HH:MM)
    pub square_off: String,
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            market_open: "09:15".to_string(),
            entry_cutoff: "15:00".to_string(),
            square_off: "15:15".to_string(),
            utc_offset_minutes: 330,
        }
    }
}

pub fn parse_hhmm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| format!("invalid time '{}', expected HH:MM", raw))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub kind: GatewayKind,
    /// Kite API root (defaults to https://api.kite.trade)
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Already-issued Kite access token
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
    /// Simulated cash for the paper gateway (defaults to total capital)
    pub paper_capital: Option<Decimal>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: GatewayKind::Paper,
            base_url: None,
            api_key: None,
            access_token: None,
            request_timeout_ms: 10_000,
            paper_capital: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Suppress duplicate alerts within this window
    pub rate_limit_secs: u64,
    pub max_alerts_per_minute: u32,
    /// Forward info-level alerts too
    pub notify_info: bool,
    /// Optional chat webhook receiving alert text
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rate_limit_secs: 60,
            max_alerts_per_minute: 10,
            notify_info: false,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct JournalConfig {
    /// Append closed trades here as JSON lines
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("gateway.kind", "paper")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ZEROBOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // ZEROBOT_CAPITAL__TOTAL_CAPITAL, ZEROBOT_GATEWAY__ACCESS_TOKEN, ...
            .add_source(
                Environment::with_prefix("ZEROBOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Paper-trading configuration with the given capital split
    pub fn paper(total_capital: Decimal, max_positions: u32) -> Self {
        Self {
            capital: CapitalConfig {
                total_capital,
                max_positions,
                ..CapitalConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let cap = &self.capital;

        if cap.total_capital <= Decimal::ZERO {
            errors.push("total_capital must be positive".to_string());
        }
        if cap.max_positions == 0 {
            errors.push("max_positions must be at least 1".to_string());
        }
        for (name, value) in [
            ("risk_per_trade", cap.risk_per_trade),
            ("stop_loss_pct", cap.stop_loss_pct),
            ("target_pct", cap.target_pct),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                errors.push(format!("{} must be between 0 and 1", name));
            }
        }
        if cap.min_confidence < Decimal::ZERO || cap.min_confidence > Decimal::ONE {
            errors.push("min_confidence must be within [0, 1]".to_string());
        }

        let exec = &self.execution;
        if exec.poll_interval_ms == 0 || exec.price_poll_ms == 0 {
            errors.push("poll intervals must be positive".to_string());
        }
        if exec.order_timeout_ms < exec.poll_interval_ms {
            errors.push("order_timeout_ms should be at least poll_interval_ms".to_string());
        }
        if exec.max_exit_attempts == 0 {
            errors.push("max_exit_attempts must be at least 1".to_string());
        }

        let sched = &self.schedule;
        let times = (
            parse_hhmm(&sched.market_open),
            parse_hhmm(&sched.entry_cutoff),
            parse_hhmm(&sched.square_off),
        );
        match times {
            (Ok(open), Ok(cutoff), Ok(square_off)) => {
                if !(open < cutoff && cutoff <= square_off) {
                    errors.push(
                        "schedule must satisfy market_open < entry_cutoff <= square_off"
                            .to_string(),
                    );
                }
            }
            (a, b, c) => {
                errors.extend([a.err(), b.err(), c.err()].into_iter().flatten());
            }
        }
        if sched.utc_offset_minutes.abs() >= 24 * 60 {
            errors.push("utc_offset_minutes out of range".to_string());
        }

        if self.gateway.kind == GatewayKind::Kite {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
            if missing(&self.gateway.api_key) || missing(&self.gateway.access_token) {
                errors.push("kite gateway requires api_key and access_token".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.capital.total_capital, dec!(5000));
        assert_eq!(cfg.capital.max_positions, 5);
        assert_eq!(cfg.schedule.utc_offset_minutes, 330);
        assert_eq!(cfg.gateway.kind, GatewayKind::Paper);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_collects_every_problem() {
        let mut cfg = AppConfig::paper(dec!(100000), 4);
        cfg.capital.total_capital = Decimal::ZERO;
        cfg.capital.stop_loss_pct = dec!(1.5);
        cfg.schedule.entry_cutoff = "16:00".to_string();
        cfg.gateway.kind = GatewayKind::Kite;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("total_capital")));
        assert!(errors.iter().any(|e| e.contains("stop_loss_pct")));
        assert!(errors.iter().any(|e| e.contains("schedule")));
        assert!(errors.iter().any(|e| e.contains("kite")));
    }

    #[test]
    fn bad_time_is_reported() {
        let mut cfg = AppConfig::default();
        cfg.schedule.square_off = "3pm".to_string();
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors, vec!["invalid time '3pm', expected HH:MM".to_string()]);
    }

    #[test]
    fn parse_hhmm_accepts_seconds() {
        assert_eq!(
            parse_hhmm("15:15:30").unwrap(),
            NaiveTime::from_hms_opt(15, 15, 30).unwrap()
        );
    }

    #[test]
    fn load_from_missing_dir_uses_defaults() {
        let dir = std::env::temp_dir().join(format!("zerobot-cfg-{}", uuid::Uuid::new_v4()));
        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.capital.risk_per_trade, dec!(0.02));
        assert_eq!(cfg.execution.max_exit_attempts, 8);
    }

    #[test]
    fn load_from_reads_default_toml() {
        let dir = std::env::temp_dir().join(format!("zerobot-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            "[capital]\ntotal_capital = 100000\nmax_positions = 4\n\n[schedule]\nenabled = false\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.capital.total_capital, dec!(100000));
        assert_eq!(cfg.capital.max_positions, 4);
        assert_eq!(cfg.capital.stop_loss_pct, dec!(0.015));
        assert!(!cfg.schedule.enabled);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn older_files_with_min_positions_still_load() {
        let dir = std::env::temp_dir().join(format!("zerobot-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("default.toml"),
            "[capital]\ntotal_capital = 50000\nmax_positions = 2\nmin_positions = 3\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&dir).unwrap();
        assert_eq!(cfg.capital.max_positions, 2);
        assert!(cfg.validate().is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }
}
