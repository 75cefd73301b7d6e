use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::trade_logger::TradeRecord;

/// End-of-day performance summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Percentage of trades closed in profit
    pub win_rate: Decimal,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub net_pnl: Decimal,
    pub avg_profit: Decimal,
    pub avg_loss: Decimal,
    /// Largest fall from the running P&L peak, as a percentage of that peak
    pub max_drawdown_pct: Decimal,
    /// Net P&L as a percentage of session capital
    pub daily_return_pct: Decimal,
}

impl SessionStats {
    pub fn from_trades(trades: &[TradeRecord], session_capital: Decimal) -> Self {
        let mut stats = SessionStats {
            total_trades: trades.len() as u32,
            ..Default::default()
        };

        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        for trade in trades {
            if trade.pnl > Decimal::ZERO {
                stats.winning_trades += 1;
                stats.total_profit += trade.pnl;
            } else if trade.pnl < Decimal::ZERO {
                stats.losing_trades += 1;
                stats.total_loss += trade.pnl.abs();
            }

            cumulative += trade.pnl;
            peak = peak.max(cumulative);
            if peak > Decimal::ZERO {
                let drawdown = (peak - cumulative) / peak * dec!(100);
                stats.max_drawdown_pct = stats.max_drawdown_pct.max(drawdown);
            }
        }

        stats.net_pnl = stats.total_profit - stats.total_loss;
        if stats.total_trades > 0 {
            stats.win_rate = (Decimal::from(stats.winning_trades) * dec!(100)
                / Decimal::from(stats.total_trades))
            .round_dp(2);
        }
        if stats.winning_trades > 0 {
            stats.avg_profit = (stats.total_profit / Decimal::from(stats.winning_trades)).round_dp(2);
        }
        if stats.losing_trades > 0 {
            stats.avg_loss = (stats.total_loss / Decimal::from(stats.losing_trades)).round_dp(2);
        }
        if session_capital > Decimal::ZERO {
            stats.daily_return_pct = (stats.net_pnl / session_capital * dec!(100)).round_dp(2);
        }
        stats.max_drawdown_pct = stats.max_drawdown_pct.round_dp(2);
        stats
    }

    pub fn format(&self) -> String {
        format!(
            "trades={} wins={} losses={} win_rate={}% net_pnl={} avg_profit={} avg_loss={} max_dd={}% return={}%",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate,
            self.net_pnl,
            self.avg_profit,
            self.avg_loss,
            self.max_drawdown_pct,
            self.daily_return_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, Instrument};
    use chrono::Utc;

    fn trade(pnl: Decimal) -> TradeRecord {
        TradeRecord {
            position_id: uuid::Uuid::new_v4().to_string(),
            instrument: Instrument::nse("INFY"),
            direction: Direction::Long,
            quantity: 1,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            pnl,
            exit_reason: None,
            opened_at: None,
            closed_at: Utc::now(),
            source: None,
        }
    }

    #[test]
    fn empty_session() {
        let stats = SessionStats::from_trades(&[], dec!(5000));
        assert_eq!(stats, SessionStats::default());
    }

    #[test]
    fn aggregates_wins_losses_and_drawdown() {
        let trades = vec![trade(dec!(300)), trade(dec!(-150)), trade(dec!(100)), trade(dec!(-50))];
        let stats = SessionStats::from_trades(&trades, dec!(10000));

        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 2);
        assert_eq!(stats.win_rate, dec!(50));
        assert_eq!(stats.net_pnl, dec!(200));
        assert_eq!(stats.avg_profit, dec!(200));
        assert_eq!(stats.avg_loss, dec!(100));
        // peak 300, trough 150
        assert_eq!(stats.max_drawdown_pct, dec!(50));
        assert_eq!(stats.daily_return_pct, dec!(2));
        assert!(stats.format().contains("wins=2 losses=2"));
    }
}
