//! Trade executor.
//!
//! Turns a wallet's turn into orders: set leverage, read the mark price,
//! size and round the bet, then submit the market buy, the optional
//! margin top-up and the take-profit limit sell. Order ids are recorded
//! on the wallet as each submission succeeds, so a partial failure still
//! leaves the wallet tracking what the venue actually holds. A failed
//! top-up does not stop the exit order from being placed.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::wallet::Wallet;
use crate::strategy::precision::SymbolPrecision;
use crate::strategy::{PlannedBet, StakePlanner};
use crate::types::{OrderId, StakerError, TimeInForce};
use crate::venue::FuturesVenue;

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BetOutcome {
    Placed {
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        margin_added: Decimal,
    },
    /// Computed and logged only.
    DryRun(Box<PlannedBet>),
    /// Rounded quantity was zero; nothing to submit.
    TooSmall,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    time_in_force: TimeInForce,
    dry_run: bool,
}

impl Executor {
    pub fn new(time_in_force: TimeInForce, dry_run: bool) -> Self {
        Self {
            time_in_force,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Place one bet for an idle wallet.
    pub async fn place_bet(
        &self,
        venue: &dyn FuturesVenue,
        planner: &StakePlanner,
        wallet: &mut Wallet,
    ) -> Result<BetOutcome, StakerError> {
        if !wallet.is_eligible() {
            return Err(StakerError::InvalidInput(format!(
                "wallet {} has outstanding orders",
                wallet.wallet_id
            )));
        }

        let symbol = wallet.symbol.clone();
        let venue_err = |e: anyhow::Error| StakerError::venue(venue.name(), e);

        if !self.dry_run {
            venue
                .set_leverage(&symbol, wallet.leverage)
                .await
                .map_err(venue_err)?;
        }

        let mark_price = venue
            .get_open_position(&symbol)
            .await
            .map_err(venue_err)?
            .mark_price;
        let precision = SymbolPrecision {
            step: venue.get_step_size(&symbol).await.map_err(venue_err)?,
            tick: venue.get_tick_size(&symbol).await.map_err(venue_err)?,
        };

        let bet = planner.plan(
            wallet.wallet_id,
            &symbol,
            wallet.balance,
            mark_price,
            wallet.leverage,
            precision,
        )?;

        if !bet.is_tradable() {
            warn!(
                wallet_id = wallet.wallet_id,
                symbol = %symbol,
                qty = %bet.plan.entry_quantity,
                step = precision.step,
                "Bet rounds to zero quantity; skipping"
            );
            return Ok(BetOutcome::TooSmall);
        }

        if self.dry_run {
            info!(
                wallet_id = wallet.wallet_id,
                symbol = %symbol,
                qty = %bet.rounded.entry_quantity,
                entry = %bet.rounded.entry_price,
                exit = %bet.rounded.exit_price,
                liq = %bet.rounded.liquidation_price,
                stake = format!("${:.2}", bet.plan.total_margin),
                margin_add = %bet.rounded.margin_add,
                "[DRY RUN] Would place bet"
            );
            return Ok(BetOutcome::DryRun(Box::new(bet)));
        }

        let buy_order_id = venue
            .submit_market_buy(&symbol, bet.rounded.entry_quantity)
            .await
            .map_err(venue_err)?;
        wallet.record_buy(buy_order_id);
        wallet.record_planned_liquidation(bet.rounded.liquidation_price);

        let mut margin_added = Decimal::ZERO;
        if bet.rounded.margin_add > Decimal::ZERO {
            match venue.add_isolated_margin(&symbol, bet.rounded.margin_add).await {
                Ok(()) => {
                    margin_added = bet.rounded.margin_add;
                    wallet.record_margin_added(margin_added);
                }
                Err(e) => warn!(
                    wallet_id = wallet.wallet_id,
                    symbol = %symbol,
                    buy_order_id,
                    amount = %bet.rounded.margin_add,
                    error = %e,
                    "Margin top-up failed; exit placed on initial margin only"
                ),
            }
        }

        let sell_order_id = venue
            .submit_limit_sell(
                &symbol,
                bet.rounded.exit_quantity,
                bet.rounded.exit_price,
                self.time_in_force,
            )
            .await
            .map_err(|e| {
                warn!(
                    wallet_id = wallet.wallet_id,
                    symbol = %symbol,
                    buy_order_id,
                    "Entry placed without exit order"
                );
                venue_err(e)
            })?;
        wallet.record_sell(sell_order_id);

        info!(
            wallet_id = wallet.wallet_id,
            symbol = %symbol,
            buy_order_id,
            sell_order_id,
            qty = %bet.rounded.entry_quantity,
            exit = %bet.rounded.exit_price,
            stake = format!("${:.2}", bet.plan.total_margin),
            "Bet placed"
        );

        Ok(BetOutcome::Placed {
            buy_order_id,
            sell_order_id,
            margin_added,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
