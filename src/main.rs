// src/main.rs
use anyhow::Context;
use dotenvy::dotenv;
use rust_decimal::Decimal;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use the_reconciler::config::AppConfig;
use the_reconciler::connectors::bybit::BybitClient;
use the_reconciler::connectors::paper::PaperExchange;
use the_reconciler::connectors::traits::ExchangeClient;
use the_reconciler::utils::retry::CallPolicy;
use the_reconciler::{PlanResult, Reconciler, SignalRequest, TracingSink};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PAPER_WALLET_USDT: i64 = 10_000;

fn init_tracing(log_dir: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "reconciler.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    Ok(guard)
}

fn report(origin: &str, symbol: &str, result: &PlanResult) {
    if result.success {
        info!(origin, symbol, case = ?result.case, steps = result.steps_executed.len(), "signal reconciled");
    } else {
        warn!(origin, symbol, error = ?result.error, "signal not reconciled");
    }
}

/// Re-reads the signal file on every tick. Reconciling an unchanged signal is a no-op.
async fn run_periodic(
    reconciler: Arc<Reconciler>,
    symbol: String,
    signal_file: String,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => {
                info!("🛑 Periodic driver shutting down");
                return;
            }
        }

        let raw = match tokio::fs::read_to_string(&signal_file).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(file = %signal_file, error = %e, "no signal file, skipping tick");
                continue;
            }
        };
        let request: SignalRequest = match serde_json::from_str(&raw) {
            Ok(request) => request,
            Err(e) => {
                error!(file = %signal_file, error = %e, "signal file is not a valid signal");
                continue;
            }
        };

        // a started plan always runs to its end, shutdown is only observed between ticks
        let result = reconciler.reconcile(&symbol, &request).await;
        report("periodic", &symbol, &result);
    }
}

/// Reads stdin on a plain thread so a pending read never holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// One JSON signal per stdin line, as issued by an operator.
async fn run_manual(
    reconciler: Arc<Reconciler>,
    default_symbol: String,
    mut lines: mpsc::Receiver<String>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = shutdown.recv() => {
                info!("🛑 Manual driver shutting down");
                return;
            }
        };

        let line = match line {
            Some(line) => line,
            None => {
                info!("stdin closed, manual driver stopped");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: SignalRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed command: {}", e);
                continue;
            }
        };
        let symbol = request.symbol.clone().unwrap_or_else(|| default_symbol.clone());
        let result = reconciler.reconcile(&symbol, &request).await;
        report("manual", &symbol, &result);
        match serde_json::to_string(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to render result: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::new().context("loading configuration")?;
    let _log_guard = init_tracing(&config.driver.log_dir)?;

    let live_trading = config.exchange.live_trading;
    let symbol = config.driver.symbol.clone();

    println!("========================================");
    println!("        THE RECONCILER - v0.1.1");
    println!("========================================");
    println!("Target: {}", symbol);
    println!(
        "Mode:   {}",
        if live_trading {
            "🚨 LIVE TRADING"
        } else {
            "📝 PAPER TRADING"
        }
    );
    println!("========================================");

    let client: Arc<dyn ExchangeClient> = if live_trading {
        Arc::new(BybitClient::from_config(&config.exchange)?)
    } else {
        Arc::new(PaperExchange::new(Decimal::from(PAPER_WALLET_USDT)))
    };
    info!(exchange = client.name(), "exchange client ready");

    let policy = CallPolicy::new(config.retry.clone().into(), config.exchange.request_timeout());
    let reconciler = Arc::new(Reconciler::new(
        client,
        config.reconciler.clone(),
        policy,
        Arc::new(TracingSink),
    ));

    if !Path::new(&config.driver.signal_file).exists() {
        warn!(file = %config.driver.signal_file, "signal file not found yet, periodic driver will wait for it");
    }

    let (shutdown_tx, _) = broadcast::channel(4);
    let periodic = tokio::spawn(run_periodic(
        reconciler.clone(),
        symbol.clone(),
        config.driver.signal_file.clone(),
        Duration::from_secs(config.driver.poll_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    ));
    let manual = tokio::spawn(run_manual(
        reconciler,
        symbol,
        spawn_stdin_reader(),
        shutdown_tx.subscribe(),
    ));

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    let _ = shutdown_tx.send(());
    for (name, task) in [("periodic", periodic), ("manual", manual)] {
        if let Err(e) = task.await {
            error!("{} driver panicked: {}", name, e);
        }
    }

    info!("👋 Reconciler shutdown complete");
    Ok(())
}
