//! Trading venue integrations.
//!
//! Defines the `FuturesVenue` trait the engine trades through and
//! provides the Binance USD-M futures implementation.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{
    AccountBalance, OpenOrder, OrderId, OrderSnapshot, PositionReport, TimeInForce,
};

/// Abstraction over a leveraged futures venue.
///
/// The engine only reads venue state and appends new orders; it never
/// amends or cancels existing ones. Every call may fail transiently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FuturesVenue: Send + Sync {
    /// Total and free balance of one asset.
    async fn get_free_balance(&self, asset: &str) -> Result<AccountBalance>;

    /// Every known order for the given symbols, in one snapshot.
    async fn get_order_snapshot(&self, symbols: &[String]) -> Result<Vec<OrderSnapshot>>;

    /// Live position (and mark price) for one symbol.
    async fn get_open_position(&self, symbol: &str) -> Result<PositionReport>;

    /// All positions with a non-zero amount.
    async fn get_open_positions(&self) -> Result<Vec<PositionReport>>;

    /// Orders still resting on the book, across all symbols.
    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>>;

    /// Highest leverage the venue allows for `symbol`.
    async fn get_max_leverage(&self, symbol: &str) -> Result<u32>;

    /// Market buy; returns the venue order id.
    async fn submit_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderId>;

    /// Limit sell; returns the venue order id.
    async fn submit_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<OrderId>;

    /// Post extra isolated margin on an open position.
    async fn add_isolated_margin(&self, symbol: &str, amount: Decimal) -> Result<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Quantity decimals allowed for `symbol`.
    async fn get_step_size(&self, symbol: &str) -> Result<u32>;

    /// Price decimals allowed for `symbol`; zero means unrestricted.
    async fn get_tick_size(&self, symbol: &str) -> Result<u32>;

    /// Venue name for logging and identification.
    fn name(&self) -> &str;
}
