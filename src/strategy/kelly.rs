//! Kelly-style fixed-fraction bet sizing for leveraged long entries.
//!
//! Turns a wallet balance and the current mark price into a complete bet
//! plan: entry quantity, take-profit price, liquidation price and the
//! projected outcome of both the winning and the liquidated case.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::debug;

use crate::types::StakerError;

/// Fraction of the wallet balance staked on every bet.
///
/// From f = p - (1 - p) / (b - 1) with an assumed win probability
/// p = 0.75 and gross odds b = 1.4. Not re-estimated from live data.
pub const BET_SIZE_FACTOR: Decimal = dec!(0.125);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing parameters shared by every wallet.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Gross odds targeted per bet, wager included (1.2 = +20% on the stake).
    pub gross_odds: Decimal,
    /// Stake divisor: 1.0 posts everything as initial margin, 2.0 posts half
    /// up front and adds the other half as isolated margin.
    pub margin_factor: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            gross_odds: dec!(1.2),
            margin_factor: Decimal::ONE,
        }
    }
}

// ---------------------------------------------------------------------------
// Bet plan
// ---------------------------------------------------------------------------

/// Sized bet for one round. Recomputed for every new bet, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BetPlan {
    pub bet_size_factor: Decimal,
    pub gross_odds: Decimal,
    pub initial_margin: Decimal,
    pub margin_add: Decimal,
    pub total_margin: Decimal,
    pub entry_quantity: Decimal,
    pub exit_quantity: Decimal,
    /// Market price at sizing time.
    pub entry_price: Decimal,
    /// Take-profit limit price.
    pub exit_price: Decimal,
    /// Price at which the full stake is gone.
    pub liquidation_price: Decimal,
    pub gain: Decimal,
    /// What the position pays back on a win (stake + gain).
    pub proceeds: Decimal,
    pub roe_win_pct: Decimal,
    pub roe_loss_pct: Decimal,
    pub gain_pct: Decimal,
    pub price_gain_pct: Decimal,
    pub price_drop_pct: Decimal,
}

impl fmt::Display for BetPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buy {} @ {} (margin {:.2} + {:.2}), sell @ {} (+{:.2}%, gain {:.2}, ROE +{:.2}%), liq ~{} ({:.2}%, ROE -{:.2}%)",
            self.entry_quantity.normalize(),
            self.entry_price.normalize(),
            self.initial_margin,
            self.margin_add,
            self.exit_price.normalize(),
            self.price_gain_pct,
            self.gain,
            self.roe_win_pct,
            self.liquidation_price.normalize(),
            self.price_drop_pct,
            self.roe_loss_pct,
        )
    }
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Size a leveraged long bet.
///
/// Fails with `InvalidInput` for a non-positive balance, market price,
/// leverage or margin factor, and for inputs whose plan falls outside
/// the decimal range (a stake that sizes to zero quantity, or an
/// overflowing notional), instead of producing a degenerate plan.
pub fn size_bet(
    balance: Decimal,
    market_price: Decimal,
    leverage: Decimal,
    gross_odds: Decimal,
    margin_factor: Decimal,
) -> Result<BetPlan, StakerError> {
    if market_price <= Decimal::ZERO {
        return Err(StakerError::InvalidInput(format!(
            "market price must be positive, got {market_price}"
        )));
    }
    if leverage <= Decimal::ZERO {
        return Err(StakerError::InvalidInput(format!(
            "leverage must be positive, got {leverage}"
        )));
    }
    if margin_factor <= Decimal::ZERO {
        return Err(StakerError::InvalidInput(format!(
            "margin factor must be positive, got {margin_factor}"
        )));
    }
    if balance <= Decimal::ZERO {
        return Err(StakerError::InvalidInput(format!(
            "balance must be positive, got {balance}"
        )));
    }

    let out_of_range = |what: &str| {
        StakerError::InvalidInput(format!(
            "{what} out of decimal range (balance {balance}, price {market_price}, leverage {leverage})"
        ))
    };

    let bet_size = balance
        .checked_mul(BET_SIZE_FACTOR)
        .ok_or_else(|| out_of_range("stake"))?;
    let initial_margin = bet_size
        .checked_div(margin_factor)
        .ok_or_else(|| out_of_range("initial margin"))?;
    let margin_add = bet_size - initial_margin;
    let total_margin = initial_margin + margin_add;
    let entry_quantity = initial_margin
        .checked_mul(leverage)
        .and_then(|notional| notional.checked_div(market_price))
        .ok_or_else(|| out_of_range("entry quantity"))?;
    if entry_quantity.is_zero() || initial_margin.is_zero() {
        return Err(StakerError::InvalidInput(format!(
            "stake of {bet_size} is too small to size at price {market_price}"
        )));
    }
    let proceeds = total_margin
        .checked_mul(gross_odds)
        .ok_or_else(|| out_of_range("proceeds"))?;
    let gain = proceeds - total_margin;
    let exit_price = gain
        .checked_div(entry_quantity)
        .and_then(|step| market_price.checked_add(step))
        .ok_or_else(|| out_of_range("exit price"))?;
    let liquidation_price = total_margin
        .checked_div(entry_quantity)
        .and_then(|drop| market_price.checked_sub(drop))
        .ok_or_else(|| out_of_range("liquidation price"))?;

    let plan = BetPlan {
        bet_size_factor: BET_SIZE_FACTOR,
        gross_odds,
        initial_margin,
        margin_add,
        total_margin,
        entry_quantity,
        exit_quantity: entry_quantity,
        entry_price: market_price,
        exit_price,
        liquidation_price,
        gain,
        proceeds,
        roe_win_pct: percent(gain, initial_margin).ok_or_else(|| out_of_range("win ROE"))?,
        roe_loss_pct: percent(total_margin, initial_margin).ok_or_else(|| out_of_range("loss ROE"))?,
        gain_pct: percent(gain, total_margin).ok_or_else(|| out_of_range("gain"))?,
        price_gain_pct: percent(exit_price, market_price)
            .map(|p| p - Decimal::ONE_HUNDRED)
            .ok_or_else(|| out_of_range("price gain"))?,
        price_drop_pct: percent(liquidation_price, market_price)
            .map(|p| p - Decimal::ONE_HUNDRED)
            .ok_or_else(|| out_of_range("price drop"))?,
    };

    debug!(
        balance = %balance,
        market_price = %market_price,
        leverage = %leverage,
        quantity = %plan.entry_quantity,
        exit_price = %plan.exit_price,
        liq_price = %plan.liquidation_price,
        "Bet sized"
    );

    Ok(plan)
}

/// `100 * num / den`, or `None` on overflow or a zero denominator.
fn percent(num: Decimal, den: Decimal) -> Option<Decimal> {
    Decimal::ONE_HUNDRED.checked_mul(num)?.checked_div(den)
}

/// Full Kelly stake for gross odds `b` and win probability `p`.
///
/// f* = p - (1 - p) / (b - 1). Returns `None` when `b <= 1` (no payout).
pub fn kelly_fraction(win_probability: Decimal, gross_odds: Decimal) -> Option<Decimal> {
    let net_odds = gross_odds - Decimal::ONE;
    if net_odds <= Decimal::ZERO {
        return None;
    }
    Some(win_probability - (Decimal::ONE - win_probability) / net_odds)
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the sizing configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size a bet with the configured odds and margin factor.
    pub fn size_bet(
        &self,
        balance: Decimal,
        market_price: Decimal,
        leverage: u32,
    ) -> Result<BetPlan, StakerError> {
        size_bet(
            balance,
            market_price,
            Decimal::from(leverage),
            self.config.gross_odds,
            self.config.margin_factor,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
