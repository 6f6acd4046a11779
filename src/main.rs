//! STAKER — Fixed-fraction leveraged futures wallet bot
//!
//! Entry point. Loads configuration, initialises structured logging,
//! seeds the wallets from the account balance, and runs the
//! reconcile→bet loop on a fixed interval with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, info_span};

use staker::config::AppConfig;
use staker::engine::accountant::Accountant;
use staker::engine::portfolio::Portfolio;
use staker::venue::binance::{BinanceCredentials, BinanceFuturesClient};
use staker::venue::FuturesVenue;

const BANNER: &str = r#"
 ____  _____  _    _  _______ ____
/ ___||_   _|/ \  | |/ / ____|  _ \
\___ \  | | / _ \ | ' /|  _| | |_) |
 ___) | | |/ ___ \| . \| |___|  _ <
|____/  |_/_/   \_\_|\_\_____|_| \_\

  Fixed-fraction leveraged futures wallets
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("STAKER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        dry_run = cfg.agent.dry_run,
        wallets = cfg.wallets.len(),
        symbols = ?cfg.symbols(),
        "STAKER starting up"
    );

    // -- Initialise components -------------------------------------------

    let credentials =
        BinanceCredentials::from_env(&cfg.venue.api_key_env, &cfg.venue.api_secret_env)
            .context("Binance credentials are required (dry run still reads account state)")?;
    let client = BinanceFuturesClient::with_options(
        credentials,
        &cfg.venue.base_url,
        cfg.venue.recv_window_ms,
        cfg.venue.timeout_secs,
    )?;
    let venue: Arc<dyn FuturesVenue> = Arc::new(client);

    let span = info_span!("portfolio", agent = %cfg.agent.name, venue = venue.name());
    let mut portfolio = Portfolio::from_config(&cfg, venue, span).await?;

    for wallet in portfolio.wallets() {
        info!(
            wallet_id = wallet.wallet_id,
            symbol = %wallet.symbol,
            balance = format!("${:.2}", wallet.balance),
            leverage = wallet.leverage,
            "Wallet initialised"
        );
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.cycle_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = portfolio.run_cycle().await;
                info!(summary = %report, "Cycle complete");
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let total = Accountant::total_balance(portfolio.wallets());
    let initial: rust_decimal::Decimal = portfolio.wallets().map(|w| w.initial_balance).sum();
    info!(
        cycles = portfolio.cycle_count(),
        balance = format!("${:.2}", total),
        pnl = format!("${:.2}", total - initial),
        "STAKER shut down cleanly. Open orders remain on the venue."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("staker=info"));

    let json_logging = std::env::var("STAKER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
