//! Closed-trade journal.
//!
//! Every flattened position becomes a `TradeRecord`; the logger appends them
//! to a JSON-lines file when a path is configured.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::domain::{Direction, ExitReason, Instrument, Position};

/// One completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: String,
    pub instrument: Instrument,
    pub direction: Direction,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub exit_reason: Option<ExitReason>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
}

impl TradeRecord {
    /// Record for a closed position; `None` until both fills are known
    pub fn from_position(position: &Position) -> Option<Self> {
        Some(Self {
            position_id: position.id.clone(),
            instrument: position.instrument.clone(),
            direction: position.direction,
            quantity: position.quantity,
            entry_price: position.entry_fill_price?,
            exit_price: position.exit_fill_price?,
            pnl: position.realized_pnl?,
            exit_reason: position.exit_reason,
            opened_at: position.opened_at,
            closed_at: position.closed_at.unwrap_or_else(Utc::now),
            source: position.source.clone(),
        })
    }

    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// Append-only trade journal
pub struct TradeLogger {
    path: Option<PathBuf>,
}

impl TradeLogger {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Append to the journal file; errors are logged, never fatal to the session
    pub async fn record(&self, record: &TradeRecord) {
        let Some(path) = &self.path else {
            return;
        };
        match append_line(path, record).await {
            Ok(()) => debug!(position_id = %record.position_id, "trade journaled"),
            Err(e) => error!(path = %path.display(), "failed to journal trade: {}", e),
        }
    }

    /// Read every record back from a journal file
    pub async fn load(path: &PathBuf) -> crate::error::Result<Vec<TradeRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

async fn append_line(path: &PathBuf, record: &TradeRecord) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn closed_position() -> Position {
        let mut pos = Position::pending(
            Instrument::nse("INFY"),
            Direction::Long,
            10,
            dec!(1000),
            dec!(100),
            dec!(98.5),
            dec!(103),
            Some("breakout".into()),
        );
        pos.mark_open(dec!(100)).unwrap();
        pos.begin_exit(ExitReason::Target).unwrap();
        pos.mark_closed(dec!(103)).unwrap();
        pos
    }

    #[test]
    fn record_requires_closed_position() {
        let open = Position::pending(
            Instrument::nse("TCS"),
            Direction::Long,
            1,
            dec!(10),
            dec!(10),
            dec!(9),
            dec!(11),
            None,
        );
        assert!(TradeRecord::from_position(&open).is_none());

        let record = TradeRecord::from_position(&closed_position()).unwrap();
        assert_eq!(record.pnl, dec!(30));
        assert!(record.is_win());
        assert_eq!(record.exit_reason, Some(ExitReason::Target));
    }

    #[tokio::test]
    async fn journal_appends_json_lines() {
        let path = std::env::temp_dir()
            .join(format!("zerobot-journal-{}", uuid::Uuid::new_v4()))
            .join("trades.jsonl");
        let logger = TradeLogger::new(Some(path.clone()));

        let record = TradeRecord::from_position(&closed_position()).unwrap();
        logger.record(&record).await;
        logger.record(&record).await;

        let loaded = TradeLogger::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], record);
        assert!(TradeLogger::disabled().path().is_none());

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
