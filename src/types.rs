//! Shared types for the STAKER agent.
//!
//! Venue-facing records (order snapshots, position reports, balances),
//! order enums, and the domain error type. Engine, strategy and venue
//! modules all depend on this file and nothing here depends on them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configured wallet identifier (e.g. 11, 22, 33).
pub type WalletId = u32;

/// Venue-assigned order identifier.
pub type OrderId = u64;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status as reported by the venue.
///
/// `None` is the local "no status observed yet" value. Anything the
/// venue reports outside the known set lands in `Other` verbatim so it
/// can be surfaced in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    #[default]
    None,
    New,
    Filled,
    Canceled,
    Expired,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::None => "none",
            OrderStatus::New => "NEW",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Other(s) => s,
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(s: &str) -> Self {
        match s {
            "" | "none" => OrderStatus::None,
            "NEW" => OrderStatus::New,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "EXPIRED" => OrderStatus::Expired,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(s: String) -> Self {
        OrderStatus::from(s.as_str())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit order time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good till canceled.
    #[default]
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Post only.
    Gtx,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Gtx => write!(f, "GTX"),
        }
    }
}

// ---------------------------------------------------------------------------
// Venue records
// ---------------------------------------------------------------------------

/// One entry of the venue's order list. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub symbol: String,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    /// Average fill price; zero while nothing has executed.
    pub average_price: Decimal,
}

impl fmt::Display for OrderSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} qty={} avg={}",
            self.order_id, self.symbol, self.status, self.executed_quantity, self.average_price,
        )
    }
}

/// Live position for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub symbol: String,
    /// Signed position size; zero when flat.
    pub position_amount: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    /// Zero when the venue has no liquidation price (flat position).
    pub liquidation_price: Decimal,
    pub leverage: u32,
    pub unrealized_profit: Decimal,
    /// Total isolated margin posted on the position.
    pub isolated_wallet: Decimal,
}

impl PositionReport {
    pub fn is_open(&self) -> bool {
        !self.position_amount.is_zero()
    }

    /// Initial margin implied by entry price and leverage.
    pub fn initial_margin(&self) -> Decimal {
        if self.leverage == 0 {
            return Decimal::ZERO;
        }
        self.position_amount.abs() * self.entry_price / Decimal::from(self.leverage)
    }

    /// Unrealized return on initial margin, in percent.
    pub fn roe_pct(&self) -> Decimal {
        let margin = self.initial_margin();
        if margin.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED * self.unrealized_profit / margin
        }
    }
}

impl fmt::Display for PositionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} qty={} entry={} mark={} liq={} lev={}x pnl={:.2} ({:.2}%)",
            self.symbol,
            self.position_amount,
            self.entry_price,
            self.mark_price,
            self.liquidation_price,
            self.leverage,
            self.unrealized_profit,
            self.roe_pct(),
        )
    }
}

/// An order still resting on the venue book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub client_order_id: String,
    pub placed_at: DateTime<Utc>,
}

impl fmt::Display for OpenOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} @ {} placed {}",
            self.order_id,
            self.symbol,
            self.side,
            self.quantity.normalize(),
            self.price.normalize(),
            self.placed_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        )
    }
}

/// Account balance for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total: Decimal,
    /// Amount available for new positions (withdrawable).
    pub free: Decimal,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for STAKER.
#[derive(Debug, thiserror::Error)]
pub enum StakerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient funds: wallets request ${requested:.2}, free balance is ${available:.2}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Venue error ({venue}): {message}")]
    Venue { venue: String, message: String },

    #[error("Unrecognized {side} order state {status} for order {order_id}")]
    UnrecognizedOrderState {
        side: OrderSide,
        order_id: OrderId,
        status: String,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StakerError {
    /// Wrap a venue client failure.
    pub fn venue(venue: &str, err: anyhow::Error) -> Self {
        StakerError::Venue {
            venue: venue.to_string(),
            message: format!("{err:#}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
