//! Rounding to venue precision grids.
//!
//! Venues only accept quantities on a step-size grid and prices on a
//! tick-size grid. Both are expressed here as a number of decimal places,
//! derived from the filter value (`0.001` → 3).

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use super::kelly::BetPlan;

/// Decimal places allowed for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolPrecision {
    /// Quantity decimals.
    pub step: u32,
    /// Price decimals. Zero disables price rounding.
    pub tick: u32,
}

/// Decimal places encoded by a filter size (`0.001` → 3, `1` → 0).
pub fn precision_from_size(size: Decimal) -> u32 {
    size.normalize().scale()
}

/// Round a quantity to the step grid (half to even).
pub fn round_quantity(quantity: Decimal, step: u32) -> Decimal {
    quantity.round_dp_with_strategy(step, RoundingStrategy::MidpointNearestEven)
}

/// Round a price to the tick grid. A tick precision of zero means the
/// venue imposes no price filter, so the price passes through.
pub fn round_price(price: Decimal, tick: u32) -> Decimal {
    if tick == 0 {
        return price;
    }
    price.round_dp_with_strategy(tick, RoundingStrategy::MidpointNearestEven)
}

/// Significant figures kept on a margin top-up amount.
pub const MARGIN_SIGNIFICANT_FIGURES: u32 = 4;

/// Round a quote-asset margin amount to four significant figures
/// (`8.3333…` → `8.333`, `1234.56` → `1235`).
pub fn round_margin(amount: Decimal) -> Decimal {
    amount
        .round_sf_with_strategy(MARGIN_SIGNIFICANT_FIGURES, RoundingStrategy::MidpointNearestEven)
        .unwrap_or(amount)
}

/// Bet plan values as they will actually be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundedBet {
    pub entry_quantity: Decimal,
    pub exit_quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub liquidation_price: Decimal,
    pub margin_add: Decimal,
}

/// Round every quantity and price of a plan for one symbol.
pub fn round_plan(plan: &BetPlan, precision: SymbolPrecision) -> RoundedBet {
    let rounded = RoundedBet {
        entry_quantity: round_quantity(plan.entry_quantity, precision.step),
        exit_quantity: round_quantity(plan.exit_quantity, precision.step),
        entry_price: round_price(plan.entry_price, precision.tick),
        exit_price: round_price(plan.exit_price, precision.tick),
        liquidation_price: round_price(plan.liquidation_price, precision.tick),
        margin_add: round_margin(plan.margin_add),
    };

    debug!(
        step = precision.step,
        tick = precision.tick,
        buy_qty = %format!("{} -> {}", plan.entry_quantity, rounded.entry_quantity),
        sell_qty = %format!("{} -> {}", plan.exit_quantity, rounded.exit_quantity),
        sell_price = %format!("{} -> {}", plan.exit_price, rounded.exit_price),
        margin_add = %format!("{} -> {}", plan.margin_add, rounded.margin_add),
        "Plan rounded to venue filters"
    );

    rounded
}
