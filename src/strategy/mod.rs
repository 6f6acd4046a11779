//! Strategy: fixed-fraction sizing and venue rounding.

pub mod kelly;
pub mod precision;

use rust_decimal::Decimal;
use tracing::info;

use crate::types::{StakerError, WalletId};
use kelly::{BetPlan, KellyCalculator};
use precision::{round_plan, RoundedBet, SymbolPrecision};

/// A sized plan together with the values that will go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBet {
    pub wallet_id: WalletId,
    pub symbol: String,
    pub leverage: u32,
    pub plan: BetPlan,
    pub rounded: RoundedBet,
}

impl PlannedBet {
    /// Whether rounding left anything to buy.
    pub fn is_tradable(&self) -> bool {
        self.rounded.entry_quantity > Decimal::ZERO
    }
}

/// Pipelines Kelly sizing → precision rounding for one wallet at a time.
pub struct StakePlanner {
    kelly: KellyCalculator,
}

impl StakePlanner {
    pub fn new(kelly: KellyCalculator) -> Self {
        Self { kelly }
    }

    /// Size and round a bet for one wallet.
    pub fn plan(
        &self,
        wallet_id: WalletId,
        symbol: &str,
        balance: Decimal,
        mark_price: Decimal,
        leverage: u32,
        precision: SymbolPrecision,
    ) -> Result<PlannedBet, StakerError> {
        let plan = self.kelly.size_bet(balance, mark_price, leverage)?;
        let rounded = round_plan(&plan, precision);

        info!(
            wallet_id,
            symbol,
            bet_size = %plan.bet_size_factor,
            gross_odds = %plan.gross_odds,
            plan = %plan,
            "Kelly plan"
        );

        Ok(PlannedBet {
            wallet_id,
            symbol: symbol.to_string(),
            leverage,
            plan,
            rounded,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
