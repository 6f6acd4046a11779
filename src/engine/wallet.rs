//! Wallet: one capital bucket and its order lifecycle.
//!
//! A wallet stakes a slice of its own balance on one symbol at a time:
//!
//! ```text
//!   Idle ──bet──► BuyPending ──buy FILLED──► PositionOpen
//!    ▲                                           │
//!    └──── sell FILLED (won) / EXPIRED (lost) / CANCELED
//! ```
//!
//! The state is never stored; it follows from which order ids are set.
//! Balance moves only at two points: the entry margin is debited when the
//! buy fill is booked, and the realized PnL is credited when the sell
//! side resolves.

use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info, warn};

use crate::types::{OrderId, OrderSide, OrderStatus, StakerError, WalletId};
use crate::venue::FuturesVenue;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletState {
    /// No orders outstanding; eligible for a new bet.
    Idle,
    /// Entry order submitted, fill not yet booked.
    BuyPending,
    /// Entry booked, exit order resting.
    PositionOpen,
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletState::Idle => write!(f, "idle"),
            WalletState::BuyPending => write!(f, "buy pending"),
            WalletState::PositionOpen => write!(f, "position open"),
        }
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Take-profit filled.
    Won { pnl: Decimal },
    /// Liquidated.
    Lost { pnl: Decimal },
    /// Exit order canceled on the venue; no balance change.
    Canceled,
}

/// Realized PnL of a long position closed at `exit_price`.
///
/// `qty * entry * (1/leverage - 1) + exit * qty`, written without the
/// reciprocal so the decimal result stays exact for any leverage.
pub fn calculate_pnl(
    quantity: Decimal,
    entry_price: Decimal,
    leverage: u32,
    exit_price: Decimal,
) -> Decimal {
    let notional = quantity * entry_price;
    notional / Decimal::from(leverage) - notional + exit_price * quantity
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub wallet_id: WalletId,
    pub symbol: String,
    pub balance: Decimal,
    /// Balance at creation, for reporting.
    pub initial_balance: Decimal,
    pub leverage: u32,

    pub entry_price: Decimal,
    /// Executed quantity of the entry order.
    pub entry_quantity: Decimal,
    pub liquidation_price: Decimal,
    /// Liquidation price the sizing predicted. Stands in for the live one
    /// when the position is already closed by the time the buy is booked.
    pub planned_liquidation_price: Decimal,
    pub margin_added: Decimal,

    pub buy_order_id: Option<OrderId>,
    pub sell_order_id: Option<OrderId>,
    pub buy_order_status: OrderStatus,
    pub sell_order_status: OrderStatus,
    pub buy_executed_quantity: Decimal,
    pub sell_executed_quantity: Decimal,
    pub buy_average_price: Decimal,
    pub sell_average_price: Decimal,

    pub bets_placed: u32,
    pub wins: u32,
    pub losses: u32,
    pub cancellations: u32,
}

impl Wallet {
    pub fn new(wallet_id: WalletId, symbol: &str, balance: Decimal, leverage: u32) -> Self {
        Self {
            wallet_id,
            symbol: symbol.to_string(),
            balance,
            initial_balance: balance,
            leverage,
            entry_price: Decimal::ZERO,
            entry_quantity: Decimal::ZERO,
            liquidation_price: Decimal::ZERO,
            planned_liquidation_price: Decimal::ZERO,
            margin_added: Decimal::ZERO,
            buy_order_id: None,
            sell_order_id: None,
            buy_order_status: OrderStatus::None,
            sell_order_status: OrderStatus::None,
            buy_executed_quantity: Decimal::ZERO,
            sell_executed_quantity: Decimal::ZERO,
            buy_average_price: Decimal::ZERO,
            sell_average_price: Decimal::ZERO,
            bets_placed: 0,
            wins: 0,
            losses: 0,
            cancellations: 0,
        }
    }

    pub fn state(&self) -> WalletState {
        match (self.buy_order_id, self.sell_order_id) {
            (Some(_), _) => WalletState::BuyPending,
            (None, Some(_)) => WalletState::PositionOpen,
            (None, None) => WalletState::Idle,
        }
    }

    /// Eligible for a new bet exactly when no order is outstanding.
    pub fn is_eligible(&self) -> bool {
        self.buy_order_id.is_none() && self.sell_order_id.is_none()
    }

    /// Profit or loss against the initial balance.
    pub fn net_pnl(&self) -> Decimal {
        self.balance - self.initial_balance
    }

    // -- Recording placed orders ------------------------------------------

    /// Start a round with a freshly submitted entry order.
    pub fn record_buy(&mut self, order_id: OrderId) {
        self.reset_round();
        self.buy_order_id = Some(order_id);
        self.bets_placed += 1;
    }

    pub fn record_planned_liquidation(&mut self, price: Decimal) {
        self.planned_liquidation_price = price;
    }

    pub fn record_margin_added(&mut self, amount: Decimal) {
        self.margin_added = amount;
    }

    pub fn record_sell(&mut self, order_id: OrderId) {
        self.sell_order_id = Some(order_id);
    }

    // -- Lifecycle transitions --------------------------------------------

    /// Whether the entry order's last known status calls for booking a fill.
    ///
    /// NEW (or not yet seen) waits; anything other than FILLED is
    /// surfaced as unrecognized and left untouched.
    pub fn buy_fill_ready(&self) -> Result<bool, StakerError> {
        let Some(order_id) = self.buy_order_id else {
            return Ok(false);
        };
        match &self.buy_order_status {
            OrderStatus::None | OrderStatus::New => Ok(false),
            OrderStatus::Filled => Ok(true),
            other => Err(StakerError::UnrecognizedOrderState {
                side: OrderSide::Buy,
                order_id,
                status: other.to_string(),
            }),
        }
    }

    /// Whether the exit order already reached a final status.
    pub fn sell_resolved(&self) -> bool {
        self.sell_order_id.is_some()
            && matches!(
                self.sell_order_status,
                OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired
            )
    }

    /// Book a filled entry: set entry and liquidation prices, debit the
    /// margin and clear the buy order id. Returns the amount debited.
    ///
    /// A zero liquidation price is only accepted once the exit has
    /// resolved; until then it means the venue has not caught up.
    pub fn apply_buy_fill(&mut self, liquidation_price: Decimal) -> Result<Decimal, StakerError> {
        let order_id = self
            .buy_order_id
            .ok_or_else(|| StakerError::OrderNotFound(format!("wallet {} has no buy order", self.wallet_id)))?;
        if self.buy_order_status != OrderStatus::Filled {
            return Err(StakerError::InvalidInput(format!(
                "buy order {order_id} is {}, not FILLED",
                self.buy_order_status
            )));
        }
        if self.buy_average_price <= Decimal::ZERO || self.buy_executed_quantity <= Decimal::ZERO {
            return Err(StakerError::OrderNotFound(format!(
                "buy order {order_id} reported FILLED without a fill price or quantity"
            )));
        }
        if liquidation_price <= Decimal::ZERO && !self.sell_resolved() {
            return Err(StakerError::OrderNotFound(format!(
                "no liquidation price for {} after buy order {order_id}",
                self.symbol
            )));
        }

        self.entry_price = self.buy_average_price;
        self.entry_quantity = self.buy_executed_quantity;
        self.liquidation_price = liquidation_price;

        let debit = self.entry_quantity * self.entry_price / Decimal::from(self.leverage)
            + self.margin_added;
        self.balance -= debit;
        self.buy_order_id = None;

        info!(
            wallet_id = self.wallet_id,
            symbol = %self.symbol,
            order_id,
            qty = %self.entry_quantity,
            entry = %self.entry_price,
            liq = %self.liquidation_price,
            debit = format!("${:.2}", debit),
            balance = format!("${:.2}", self.balance),
            "Buy filled"
        );

        Ok(debit)
    }

    /// Resolve the exit order once the entry has been booked.
    ///
    /// Returns `None` while the sell is still resting (or when the buy
    /// side has not resolved yet).
    pub fn apply_sell_status(&mut self) -> Result<Option<Resolution>, StakerError> {
        if self.buy_order_id.is_some() {
            return Ok(None);
        }
        let Some(order_id) = self.sell_order_id else {
            return Ok(None);
        };

        match self.sell_order_status.clone() {
            OrderStatus::None | OrderStatus::New => Ok(None),
            OrderStatus::Filled => {
                if self.sell_average_price <= Decimal::ZERO {
                    return Err(StakerError::OrderNotFound(format!(
                        "sell order {order_id} reported FILLED without a fill price"
                    )));
                }
                let quantity = self.sell_executed_quantity;
                if quantity != self.entry_quantity {
                    warn!(
                        wallet_id = self.wallet_id,
                        symbol = %self.symbol,
                        order_id,
                        entry_qty = %self.entry_quantity,
                        exit_qty = %quantity,
                        "Exit quantity differs from entry quantity; using executed exit quantity"
                    );
                }
                let pnl = calculate_pnl(quantity, self.entry_price, self.leverage, self.sell_average_price);
                self.balance += pnl + self.margin_added;
                self.wins += 1;
                info!(
                    wallet_id = self.wallet_id,
                    symbol = %self.symbol,
                    order_id,
                    exit = %self.sell_average_price,
                    pnl = format!("${:.2}", pnl),
                    balance = format!("${:.2}", self.balance),
                    "Bet won"
                );
                self.finish_round();
                Ok(Some(Resolution::Won { pnl }))
            }
            OrderStatus::Expired => {
                let pnl = calculate_pnl(
                    self.entry_quantity,
                    self.entry_price,
                    self.leverage,
                    self.liquidation_price,
                );
                self.balance += pnl;
                self.losses += 1;
                warn!(
                    wallet_id = self.wallet_id,
                    symbol = %self.symbol,
                    order_id,
                    liq = %self.liquidation_price,
                    pnl = format!("${:.2}", pnl),
                    balance = format!("${:.2}", self.balance),
                    "Bet lost (liquidated)"
                );
                self.finish_round();
                Ok(Some(Resolution::Lost { pnl }))
            }
            OrderStatus::Canceled => {
                self.cancellations += 1;
                warn!(
                    wallet_id = self.wallet_id,
                    symbol = %self.symbol,
                    order_id,
                    "Exit order canceled on venue"
                );
                self.finish_round();
                Ok(Some(Resolution::Canceled))
            }
            OrderStatus::Other(status) => Err(StakerError::UnrecognizedOrderState {
                side: OrderSide::Sell,
                order_id,
                status,
            }),
        }
    }

    /// Run every transition the current statuses allow.
    ///
    /// A filled buy needs the live liquidation price, so this is the only
    /// transition that talks to the venue. If the exit already resolved
    /// the position is flat and the planned liquidation price is used
    /// instead. The sell side is evaluated in the same call once the buy
    /// is booked.
    pub async fn advance(&mut self, venue: &dyn FuturesVenue) -> Result<Option<Resolution>, StakerError> {
        if self.buy_fill_ready()? {
            let liquidation_price = if self.sell_resolved() {
                debug!(
                    wallet_id = self.wallet_id,
                    symbol = %self.symbol,
                    sell_status = %self.sell_order_status,
                    liq = %self.planned_liquidation_price,
                    "Exit resolved before entry was booked; using planned liquidation price"
                );
                self.planned_liquidation_price
            } else {
                venue
                    .get_open_position(&self.symbol)
                    .await
                    .map_err(|e| StakerError::venue(venue.name(), e))?
                    .liquidation_price
            };
            self.apply_buy_fill(liquidation_price)?;
        }
        self.apply_sell_status()
    }

    fn finish_round(&mut self) {
        self.sell_order_id = None;
        debug!(wallet_id = self.wallet_id, symbol = %self.symbol, "Wallet idle");
    }

    /// Clear everything carried over from the previous round.
    fn reset_round(&mut self) {
        self.entry_price = Decimal::ZERO;
        self.entry_quantity = Decimal::ZERO;
        self.liquidation_price = Decimal::ZERO;
        self.planned_liquidation_price = Decimal::ZERO;
        self.margin_added = Decimal::ZERO;
        self.buy_order_status = OrderStatus::None;
        self.sell_order_status = OrderStatus::None;
        self.buy_executed_quantity = Decimal::ZERO;
        self.sell_executed_quantity = Decimal::ZERO;
        self.buy_average_price = Decimal::ZERO;
        self.sell_average_price = Decimal::ZERO;
    }
}

fn fmt_order(id: Option<OrderId>, status: &OrderStatus) -> String {
    match id {
        Some(id) => format!("#{id} {status}"),
        None => "-".to_string(),
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wallet {} {} [{}] balance ${:.2} (initial ${:.2}) lev {}x buy={} sell={}",
            self.wallet_id,
            self.symbol,
            self.state(),
            self.balance,
            self.initial_balance,
            self.leverage,
            fmt_order(self.buy_order_id, &self.buy_order_status),
            fmt_order(self.sell_order_id, &self.sell_order_status),
        )?;
        if self.state() == WalletState::PositionOpen {
            write!(
                f,
                " entry={} qty={} liq={}",
                self.entry_price.normalize(),
                self.entry_quantity.normalize(),
                self.liquidation_price.normalize()
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
