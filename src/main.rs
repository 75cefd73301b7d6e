use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};

use zerobot::cli::{render_plan, Cli, Commands};
use zerobot::config::AppConfig;
use zerobot::coordination::EmergencyReason;
use zerobot::coordinator::{drive_signals, SessionCoordinator};
use zerobot::error::{BotError, Result};
use zerobot::exchange::{build_gateway, build_paper_gateway, GatewayKind, OrderGateway};
use zerobot::strategy::{CapitalAllocator, JsonlSignalSource, SignalSource};
use zerobot::supervisor::AlertManager;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple, shutdown_signal, PaperPriceSeeder};

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command, config } = Cli::parse();

    match command {
        Commands::Run {
            signals,
            paper,
            capital,
            until_flat,
            drain_secs,
        } => {
            run_session(
                &config,
                signals,
                paper,
                capital,
                until_flat,
                Duration::from_secs(drain_secs),
            )
            .await?;
        }
        Commands::ValidateConfig => {
            init_logging_simple();
            validate_config(&config)?;
        }
        Commands::Plan {
            signals,
            price,
            capital,
            max_positions,
        } => {
            init_logging_simple();
            show_plan(&config, signals, price, capital, max_positions)?;
        }
    }

    Ok(())
}

async fn run_session(
    config_dir: &Path,
    signals: Option<PathBuf>,
    paper: bool,
    capital: Option<Decimal>,
    until_flat: bool,
    drain: Duration,
) -> Result<()> {
    let mut config = AppConfig::load_from(config_dir)?;
    if paper {
        config.gateway.kind = GatewayKind::Paper;
    }
    if let Some(capital) = capital {
        config.capital.total_capital = capital;
    }
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("  - {}", e);
        }
        return Err(BotError::Validation(errors.join("; ")));
    }

    init_logging(&config.logging);

    info!(
        gateway = %config.gateway.kind,
        capital = %config.capital.total_capital,
        max_positions = config.capital.max_positions,
        "Starting zerobot session"
    );

    let alerts = Arc::new(AlertManager::from_config(&config.alerts));

    let (gateway, paper_gateway): (Arc<dyn OrderGateway>, _) = match config.gateway.kind {
        GatewayKind::Paper => {
            let paper = build_paper_gateway(&config);
            (paper.clone() as Arc<dyn OrderGateway>, Some(paper))
        }
        GatewayKind::Kite => (build_gateway(&config)?, None),
    };

    let coordinator = SessionCoordinator::new(&config, gateway, alerts)?;
    let handle = coordinator.handle();
    let session = tokio::spawn(coordinator.run());

    let source: Box<dyn SignalSource> = match &signals {
        Some(path) => Box::new(
            JsonlSignalSource::open(path)
                .await
                .with_context(|| format!("opening signal file {}", path.display()))?,
        ),
        None => Box::new(JsonlSignalSource::stdin()),
    };
    let mut source: Box<dyn SignalSource> = match paper_gateway {
        Some(paper) => Box::new(PaperPriceSeeder::new(source, paper)),
        None => source,
    };

    let mut interrupted = false;
    tokio::select! {
        result = drive_signals(source.as_mut(), &handle) => match result {
            Ok(tally) => info!(
                accepted = tally.accepted,
                rejected = tally.rejected,
                "Signal feed finished"
            ),
            Err(e) => error!("Signal feed stopped: {}", e),
        },
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            interrupted = true;
        }
    }

    if !interrupted && !until_flat {
        info!("Session running, press Ctrl+C to square off and stop");
        shutdown_signal().await;
    }

    handle
        .halt_for(EmergencyReason::Shutdown, "session stopping")
        .await?;
    handle.end_of_day().await?;
    let snapshot = handle.wait_until_settled(drain).await?;
    if !snapshot.is_flat() {
        warn!(
            unresolved = snapshot.positions.iter().filter(|p| p.unresolved).count(),
            "Stopping with positions that did not close"
        );
    }

    let report = handle.shutdown().await?;
    if let Err(e) = session.await {
        error!("Session task failed: {}", e);
    }
    println!("{}", report.format());

    Ok(())
}

fn validate_config(config_dir: &Path) -> Result<()> {
    let config = AppConfig::load_from(config_dir)?;
    match config.validate() {
        Ok(()) => {
            println!("Configuration in {} is valid", config_dir.display());
            println!("  gateway:        {}", config.gateway.kind);
            println!("  total capital:  {}", config.capital.total_capital);
            println!("  max positions:  {}", config.capital.max_positions);
            println!("  risk per trade: {}", config.capital.risk_per_trade);
            Ok(())
        }
        Err(errors) => {
            println!("Configuration in {} has {} problem(s):", config_dir.display(), errors.len());
            for e in &errors {
                println!("  - {}", e);
            }
            Err(BotError::Validation(format!(
                "{} configuration problem(s)",
                errors.len()
            )))
        }
    }
}

fn show_plan(
    config_dir: &Path,
    signals: usize,
    price: Decimal,
    capital: Option<Decimal>,
    max_positions: Option<u32>,
) -> Result<()> {
    let mut config = AppConfig::load_from(config_dir)?;
    if let Some(capital) = capital {
        config.capital.total_capital = capital;
    }
    if let Some(max) = max_positions {
        config.capital.max_positions = max;
    }
    config.validate().map_err(|errors| BotError::Validation(errors.join("; ")))?;

    let allocator = CapitalAllocator::new(config.capital.clone());
    println!(
        "Capital {} across at most {} positions, {} signal(s) at {}",
        config.capital.total_capital, config.capital.max_positions, signals, price
    );
    print!("{}", render_plan(&allocator.plan(signals, price)));
    Ok(())
}
