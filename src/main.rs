// src/main.rs
use crate::config::AppConfig;
use crate::connectors::binance::BinanceClient;
use crate::core::engine::TradingEngine;
use crate::notify::Notifier;
use crate::storage::ledger::TradeLedger;
use crate::storage::position_store::PositionStore;
use crate::types::{EngineCommand, EngineEvent};
use dotenvy::dotenv;
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

mod config;
mod connectors;
mod core;
mod error;
mod notify;
mod storage;
mod tui;
mod types;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::new()?;

    // The TUI owns stdout, so interactive runs log to a rolling file; the
    // guard must outlive main or buffered lines are lost.
    let _guard: Option<tracing_appender::non_blocking::WorkerGuard> = if config.headless {
        tracing_subscriber::fmt().init();
        None
    } else {
        let file_appender = tracing_appender::rolling::daily("logs", "the_dipper.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
        Some(guard)
    };

    let api_key = env::var("BINANCE_API_KEY").unwrap_or_default();
    let secret_key = env::var("BINANCE_SECRET_KEY").unwrap_or_default();

    println!("========================================");
    println!("       THE DIPPER - v0.1.0");
    println!("========================================");
    println!("Pairs:  {}", config.pairs.join(", "));
    println!(
        "Mode:   {}",
        if config.sandbox_mode {
            "📝 SANDBOX"
        } else {
            "🚨 LIVE TRADING"
        }
    );
    println!("========================================");

    let exchange = Arc::new(BinanceClient::new(api_key, secret_key, config.sandbox_mode));
    let store = PositionStore::new(&config.engine.state_file);
    let ledger = TradeLedger::open(&config.engine.ledger_file)?;
    let notifier = Notifier::from_env();

    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);
    let (command_tx, command_rx) = mpsc::channel::<EngineCommand>(16);

    let headless = config.headless;
    let engine = Arc::new(TradingEngine::new(
        config, exchange, store, ledger, notifier, event_tx,
    ));

    let engine_task = tokio::spawn(engine.clone().run(command_rx));

    if headless {
        // No operator at the keys: start immediately, run until Ctrl+C.
        command_tx.send(EngineCommand::Start).await?;
        headless_loop(event_rx).await;
    } else {
        tui::run(event_rx, command_tx).await?;
    }

    engine_task.abort();
    Ok(())
}

/// Event consumer for server deployments. Engine log lines already reach the
/// tracing subscriber directly; this drains the stream and keeps the
/// portfolio visible at debug level.
async fn headless_loop(mut events: mpsc::Receiver<EngineEvent>) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                return;
            }
            event = events.recv() => match event {
                Some(EngineEvent::Portfolio(p)) => {
                    debug!(
                        "Portfolio: capital ${:.2}, floating PnL ${:+.2}",
                        p.available_capital, p.floating_pnl
                    );
                }
                Some(_) => {}
                None => return,
            }
        }
    }
}
