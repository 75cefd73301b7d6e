//! Exchange trading hours.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, Utc, Weekday};
use serde::Serialize;

use crate::config::{parse_hhmm, ScheduleConfig};
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    /// Before the opening bell
    PreOpen,
    /// New entries allowed
    Open,
    /// No new entries; open positions still monitored
    EntryClosed,
    /// Everything must be flat
    SquareOff,
    /// Weekend
    Closed,
}

impl MarketPhase {
    pub fn entries_allowed(&self) -> bool {
        matches!(self, MarketPhase::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketPhase::PreOpen => "pre_open",
            MarketPhase::Open => "open",
            MarketPhase::EntryClosed => "entry_closed",
            MarketPhase::SquareOff => "square_off",
            MarketPhase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MarketSchedule {
    enabled: bool,
    market_open: NaiveTime,
    entry_cutoff: NaiveTime,
    square_off: NaiveTime,
    offset: FixedOffset,
}

impl MarketSchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            BotError::Validation(format!(
                "invalid utc_offset_minutes {}",
                config.utc_offset_minutes
            ))
        })?;
        Ok(Self {
            enabled: config.enabled,
            market_open: parse_hhmm(&config.market_open).map_err(BotError::Validation)?,
            entry_cutoff: parse_hhmm(&config.entry_cutoff).map_err(BotError::Validation)?,
            square_off: parse_hhmm(&config.square_off).map_err(BotError::Validation)?,
            offset,
        })
    }

    /// Schedule that never gates anything (paper sessions, tests)
    pub fn always_open() -> Self {
        Self {
            enabled: false,
            market_open: NaiveTime::MIN,
            entry_cutoff: NaiveTime::MIN,
            square_off: NaiveTime::MIN,
            offset: Utc.fix(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self, now: DateTime<Utc>) -> MarketPhase {
        if !self.enabled {
            return MarketPhase::Open;
        }
        let local = now.with_timezone(&self.offset);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketPhase::Closed;
        }
        let t = local.time();
        if t < self.market_open {
            MarketPhase::PreOpen
        } else if t < self.entry_cutoff {
            MarketPhase::Open
        } else if t < self.square_off {
            MarketPhase::EntryClosed
        } else {
            MarketPhase::SquareOff
        }
    }

    pub fn now_phase(&self) -> MarketPhase {
        self.phase(Utc::now())
    }
}
