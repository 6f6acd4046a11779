//! Accountant: capital checks and per-cycle status reporting.
//!
//! Verifies that the wallets never claim more capital than the account
//! holds, and summarises each reconciliation cycle.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

use super::reconciler::ReconcileSummary;
use super::wallet::{Resolution, Wallet, WalletState};
use crate::types::{OpenOrder, PositionReport, StakerError};

// ---------------------------------------------------------------------------
// Cycle counters
// ---------------------------------------------------------------------------

/// Events counted while a cycle runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub bets_placed: usize,
    pub bets_failed: usize,
    pub wins: usize,
    pub losses: usize,
    pub cancellations: usize,
    pub errors: usize,
    /// Tracked orders found in the snapshot.
    pub orders_matched: usize,
    /// Tracked orders the snapshot did not contain.
    pub orders_missing: usize,
}

impl CycleStats {
    pub fn record_resolution(&mut self, resolution: &Resolution) {
        match resolution {
            Resolution::Won { .. } => self.wins += 1,
            Resolution::Lost { .. } => self.losses += 1,
            Resolution::Canceled => self.cancellations += 1,
        }
    }

    pub fn record_reconcile(&mut self, summary: ReconcileSummary) {
        self.orders_matched += summary.matched;
        self.orders_missing += summary.missing;
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub idle: usize,
    pub buy_pending: usize,
    pub position_open: usize,
    pub stats: CycleStats,
    pub total_balance: Decimal,
    pub initial_balance: Decimal,
    /// Open positions on the venue; `None` when the query failed.
    pub open_positions: Option<usize>,
    /// Resting orders on the venue; `None` when the query failed.
    pub open_orders: Option<usize>,
    pub timestamp: chrono::DateTime<Utc>,
}

impl CycleReport {
    pub fn net_pnl(&self) -> Decimal {
        self.total_balance - self.initial_balance
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} idle / {} buy pending / {} open, {} placed, {} failed, \
             W{} L{} C{}, {} errors, balance ${:.2} (initial ${:.2}, net ${:.2})",
            self.cycle_number,
            self.idle,
            self.buy_pending,
            self.position_open,
            self.stats.bets_placed,
            self.stats.bets_failed,
            self.stats.wins,
            self.stats.losses,
            self.stats.cancellations,
            self.stats.errors,
            self.total_balance,
            self.initial_balance,
            self.net_pnl(),
        )
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    pub fn total_balance<'a>(wallets: impl IntoIterator<Item = &'a Wallet>) -> Decimal {
        wallets.into_iter().map(|w| w.balance).sum()
    }

    /// Fails with `InsufficientFunds` when the wallets claim more than
    /// `available`.
    pub fn check_capital<'a>(
        wallets: impl IntoIterator<Item = &'a Wallet>,
        available: Decimal,
    ) -> Result<(), StakerError> {
        let requested = Self::total_balance(wallets);
        if requested > available {
            return Err(StakerError::InsufficientFunds {
                requested,
                available,
            });
        }
        info!(
            wallets = format!("${:.2}", requested),
            available = format!("${:.2}", available),
            "Capital check passed"
        );
        Ok(())
    }

    /// Build and log the cycle report.
    pub fn report<'a>(
        cycle_number: u64,
        wallets: impl IntoIterator<Item = &'a Wallet>,
        stats: CycleStats,
        open_positions: Option<usize>,
        open_orders: Option<usize>,
    ) -> CycleReport {
        let mut report = CycleReport {
            cycle_number,
            idle: 0,
            buy_pending: 0,
            position_open: 0,
            stats,
            total_balance: Decimal::ZERO,
            initial_balance: Decimal::ZERO,
            open_positions,
            open_orders,
            timestamp: Utc::now(),
        };

        for w in wallets {
            match w.state() {
                WalletState::Idle => report.idle += 1,
                WalletState::BuyPending => report.buy_pending += 1,
                WalletState::PositionOpen => report.position_open += 1,
            }
            report.total_balance += w.balance;
            report.initial_balance += w.initial_balance;
            debug!(
                wallet_id = w.wallet_id,
                symbol = %w.symbol,
                state = %w.state(),
                balance = format!("${:.2}", w.balance),
                bets = w.bets_placed,
                wins = w.wins,
                losses = w.losses,
                "{w}"
            );
        }

        info!(
            cycle = report.cycle_number,
            idle = report.idle,
            buy_pending = report.buy_pending,
            position_open = report.position_open,
            placed = report.stats.bets_placed,
            failed = report.stats.bets_failed,
            wins = report.stats.wins,
            losses = report.stats.losses,
            canceled = report.stats.cancellations,
            errors = report.stats.errors,
            matched = report.stats.orders_matched,
            missing = report.stats.orders_missing,
            open_positions = ?report.open_positions,
            open_orders = ?report.open_orders,
            balance = format!("${:.2}", report.total_balance),
            net = format!("${:.2}", report.net_pnl()),
            "Cycle reconciled"
        );

        report
    }

    /// Log the venue's open positions with their leverage against the
    /// symbol maximum (`?` when unknown). Returns how many there are.
    pub fn log_open_positions(
        positions: &[PositionReport],
        max_leverage: &HashMap<String, u32>,
    ) -> usize {
        info!(count = positions.len(), "Open positions");
        for p in positions {
            let max = max_leverage
                .get(&p.symbol)
                .map_or_else(|| "?".to_string(), u32::to_string);
            info!(
                symbol = %p.symbol,
                leverage = format!("{}/{}", p.leverage, max),
                entry = %p.entry_price,
                mark = %p.mark_price,
                liq = %p.liquidation_price,
                pnl = format!("${:.2}", p.unrealized_profit),
                roe = format!("{:.2}%", p.roe_pct()),
                initial_margin = format!("${:.2}", p.initial_margin()),
                total_margin = format!("${:.2}", p.isolated_wallet),
                "Position"
            );
        }
        positions.len()
    }

    /// Log the orders resting on the venue. Returns how many there are.
    pub fn log_open_orders(orders: &[OpenOrder]) -> usize {
        info!(count = orders.len(), "Open orders");
        for o in orders {
            debug!(symbol = %o.symbol, client_order_id = %o.client_order_id, "{o}");
        }
        orders.len()
    }

    /// Warn when wallet balances exceed the account total.
    pub fn recheck_capital<'a>(wallets: impl IntoIterator<Item = &'a Wallet>, account_total: Decimal) {
        let requested = Self::total_balance(wallets);
        if requested > account_total {
            warn!(
                wallets = format!("${:.2}", requested),
                account = format!("${:.2}", account_total),
                "Wallet balances exceed account balance"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
