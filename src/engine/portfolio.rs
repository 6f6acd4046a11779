//! Portfolio manager: owns the wallets and drives one cycle.
//!
//! A cycle is: one order snapshot → reconcile → lifecycle transitions →
//! new bets for idle wallets → report. A failure in one wallet is logged
//! and counted; the other wallets carry on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument, Span};

use super::accountant::{Accountant, CycleReport, CycleStats};
use super::executor::{BetOutcome, Executor};
use super::reconciler;
use super::wallet::Wallet;
use crate::config::AppConfig;
use crate::strategy::kelly::{KellyCalculator, KellyConfig};
use crate::strategy::StakePlanner;
use crate::types::{StakerError, WalletId};
use crate::venue::FuturesVenue;

#[derive(Debug, Clone)]
pub struct PortfolioSettings {
    pub quote_asset: String,
    /// Pause between consecutive bets within one cycle.
    pub bet_pause: Duration,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            bet_pause: Duration::from_secs(2),
        }
    }
}

pub struct Portfolio {
    wallets: BTreeMap<WalletId, Wallet>,
    venue: Arc<dyn FuturesVenue>,
    planner: StakePlanner,
    executor: Executor,
    settings: PortfolioSettings,
    cycle_count: u64,
    span: Span,
}

impl Portfolio {
    /// Build a portfolio after checking that the account can fund every
    /// wallet. Fails before any order is placed.
    pub async fn new(
        wallets: Vec<Wallet>,
        venue: Arc<dyn FuturesVenue>,
        planner: StakePlanner,
        executor: Executor,
        settings: PortfolioSettings,
        span: Span,
    ) -> Result<Self, StakerError> {
        let mut by_id = BTreeMap::new();
        let mut symbols = HashSet::new();
        for wallet in wallets {
            let id = wallet.wallet_id;
            if !symbols.insert(wallet.symbol.clone()) {
                return Err(StakerError::Config(format!(
                    "wallet {id} reuses symbol {}",
                    wallet.symbol
                )));
            }
            if by_id.insert(id, wallet).is_some() {
                return Err(StakerError::Config(format!("duplicate wallet_id {id}")));
            }
        }

        let balance = venue
            .get_free_balance(&settings.quote_asset)
            .await
            .map_err(|e| StakerError::venue(venue.name(), e))?;
        span.in_scope(|| Accountant::check_capital(by_id.values(), balance.free))?;

        span.in_scope(|| {
            info!(
                wallets = by_id.len(),
                venue = venue.name(),
                dry_run = executor.is_dry_run(),
                "Portfolio ready"
            )
        });

        Ok(Self {
            wallets: by_id,
            venue,
            planner,
            executor,
            settings,
            cycle_count: 0,
            span,
        })
    }

    /// Seed wallets from configuration as fractions of the free balance,
    /// truncated to whole quote units.
    pub async fn from_config(
        cfg: &AppConfig,
        venue: Arc<dyn FuturesVenue>,
        span: Span,
    ) -> Result<Self, StakerError> {
        let balance = venue
            .get_free_balance(&cfg.agent.quote_asset)
            .await
            .map_err(|e| StakerError::venue(venue.name(), e))?;

        let wallets: Vec<Wallet> = cfg
            .wallets
            .iter()
            .map(|w| {
                let amount = (balance.free * w.balance_fraction).trunc();
                Wallet::new(w.wallet_id, &w.symbol, amount, w.leverage)
            })
            .collect();

        span.in_scope(|| {
            info!(
                total = format!("${:.2}", balance.total),
                free = format!("${:.2}", balance.free),
                asset = %cfg.agent.quote_asset,
                "Account balance"
            )
        });

        let planner = StakePlanner::new(KellyCalculator::new(KellyConfig {
            gross_odds: cfg.strategy.gross_odds,
            margin_factor: cfg.strategy.margin_factor,
        }));
        let executor = Executor::new(cfg.strategy.time_in_force, cfg.agent.dry_run);
        let settings = PortfolioSettings {
            quote_asset: cfg.agent.quote_asset.clone(),
            bet_pause: Duration::from_millis(cfg.agent.bet_pause_ms),
        };

        Self::new(wallets, venue, planner, executor, settings, span).await
    }

    pub fn wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }

    pub fn wallet(&self, wallet_id: WalletId) -> Option<&Wallet> {
        self.wallets.get(&wallet_id)
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Symbols across the wallets, one per wallet.
    fn symbols(&self) -> Vec<String> {
        self.wallets.values().map(|w| w.symbol.clone()).collect()
    }

    /// Run one reconciliation cycle inside the portfolio's span.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let span = self.span.clone();
        self.cycle().instrument(span).await
    }

    async fn cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;
        let cycle = self.cycle_count;
        let venue = Arc::clone(&self.venue);
        let mut stats = CycleStats::default();

        info!(cycle, "Starting cycle");

        // 1-3. Snapshot, reconcile, transitions
        let symbols = self.symbols();
        match venue.get_order_snapshot(&symbols).await {
            Ok(snapshot) => {
                let summary = reconciler::reconcile(&snapshot, self.wallets.values_mut());
                stats.record_reconcile(summary);
                for wallet in self.wallets.values_mut() {
                    match wallet.advance(venue.as_ref()).await {
                        Ok(Some(resolution)) => stats.record_resolution(&resolution),
                        Ok(None) => {}
                        Err(e) => {
                            log_wallet_error(wallet, &e);
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!(cycle, error = %e, "Order snapshot failed; transitions deferred");
                stats.errors += 1;
            }
        }

        // 4. New bets for idle wallets
        let pause = self.settings.bet_pause;
        let mut first = true;
        for wallet in self.wallets.values_mut().filter(|w| w.is_eligible()) {
            if !first && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            first = false;

            match self
                .executor
                .place_bet(venue.as_ref(), &self.planner, wallet)
                .await
            {
                Ok(BetOutcome::Placed { .. }) => stats.bets_placed += 1,
                Ok(BetOutcome::DryRun(_)) | Ok(BetOutcome::TooSmall) => {}
                Err(e) => {
                    log_wallet_error(wallet, &e);
                    stats.bets_failed += 1;
                }
            }
        }

        // 5. Report
        match venue.get_free_balance(&self.settings.quote_asset).await {
            Ok(balance) => Accountant::recheck_capital(self.wallets.values(), balance.total),
            Err(e) => warn!(error = %e, "Balance re-check failed"),
        }
        let open_positions = match venue.get_open_positions().await {
            Ok(positions) => {
                let mut max_leverage = HashMap::new();
                for p in &positions {
                    match venue.get_max_leverage(&p.symbol).await {
                        Ok(max) => {
                            max_leverage.insert(p.symbol.clone(), max);
                        }
                        Err(e) => warn!(symbol = %p.symbol, error = %e, "Failed to fetch max leverage"),
                    }
                }
                Some(Accountant::log_open_positions(&positions, &max_leverage))
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch open positions");
                None
            }
        };
        let open_orders = match venue.get_open_orders().await {
            Ok(orders) => Some(Accountant::log_open_orders(&orders)),
            Err(e) => {
                warn!(error = %e, "Failed to fetch open orders");
                None
            }
        };

        Accountant::report(cycle, self.wallets.values(), stats, open_positions, open_orders)
    }
}

fn log_wallet_error(wallet: &Wallet, err: &StakerError) {
    match err {
        StakerError::UnrecognizedOrderState { .. } => warn!(
            wallet_id = wallet.wallet_id,
            symbol = %wallet.symbol,
            error = %err,
            "Order left untouched"
        ),
        _ => error!(
            wallet_id = wallet.wallet_id,
            symbol = %wallet.symbol,
            error = %err,
            "Wallet step failed"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
