use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

use crate::strategy::AllocationDecision;

#[derive(Parser)]
#[command(name = "zerobot")]
#[command(author = "zerobot developers")]
#[command(version = "0.1.0")]
#[command(about = "Intraday NSE/BSE trading bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, default_value = "config", global = true)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a trading session
    Run {
        /// JSON-lines signal file (reads stdin when omitted)
        #[arg(short, long)]
        signals: Option<PathBuf>,
        /// Force the paper gateway regardless of configuration
        #[arg(long)]
        paper: bool,
        /// Override capital.total_capital
        #[arg(long)]
        capital: Option<Decimal>,
        /// Stop once the signal source is exhausted and every position is flat
        #[arg(long)]
        until_flat: bool,
        /// How long to wait for exits to confirm on shutdown
        #[arg(long, default_value = "60")]
        drain_secs: u64,
    },
    /// Check configuration and print every problem found
    ValidateConfig,
    /// Show how capital would be split across back-to-back signals
    Plan {
        /// Number of signals
        #[arg(short, long, default_value = "5")]
        signals: usize,
        /// Entry price assumed for every signal
        #[arg(short, long)]
        price: Decimal,
        /// Override capital.total_capital
        #[arg(long)]
        capital: Option<Decimal>,
        /// Override capital.max_positions
        #[arg(long)]
        max_positions: Option<u32>,
    },
}

/// Table of allocation decisions, one line per signal
pub fn render_plan(decisions: &[AllocationDecision]) -> String {
    let mut out = format!(
        "{:>3}  {:>12}  {:>8}  {:>12}  {:>10}  {:>10}\n",
        "#", "budget", "qty", "capital", "stop", "target"
    );
    for (i, decision) in decisions.iter().enumerate() {
        match decision {
            AllocationDecision::Accepted(a) => out.push_str(&format!(
                "{:>3}  {:>12}  {:>8}  {:>12}  {:>10}  {:>10}\n",
                i + 1,
                a.budget.round_dp(2),
                a.quantity,
                a.capital.round_dp(2),
                a.stop_loss,
                a.target
            )),
            AllocationDecision::Rejected(reason) => {
                out.push_str(&format!("{:>3}  rejected: {}\n", i + 1, reason))
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CapitalConfig;
    use crate::strategy::CapitalAllocator;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_plan_arguments() {
        let cli = Cli::try_parse_from([
            "zerobot", "plan", "--signals", "4", "--price", "50", "--capital", "100000",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan {
                signals,
                price,
                capital,
                max_positions,
            } => {
                assert_eq!(signals, 4);
                assert_eq!(price, dec!(50));
                assert_eq!(capital, Some(dec!(100000)));
                assert!(max_positions.is_none());
            }
            _ => panic!("expected plan"),
        }
        assert_eq!(cli.config, PathBuf::from("config"));
    }

    #[test]
    fn plan_table_lists_each_signal() {
        let allocator = CapitalAllocator::new(CapitalConfig {
            total_capital: dec!(100000),
            max_positions: 4,
            ..CapitalConfig::default()
        });
        let table = render_plan(&allocator.plan(5, dec!(50)));
        assert_eq!(table.lines().count(), 6);
        assert!(table.contains("25000"));
        assert!(table.contains("18750"));
        assert!(table.contains("rejected"));
    }
}
