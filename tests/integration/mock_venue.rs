//! Mock futures venue for integration testing.
//!
//! Provides a deterministic `FuturesVenue` implementation that keeps
//! orders, positions and balances in memory. Market buys fill
//! immediately at the mark price; limit sells rest as NEW until the test
//! fills, expires or cancels them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use staker::types::*;
use staker::venue::FuturesVenue;

/// Highest leverage the mock allows on any symbol.
pub const MOCK_MAX_LEVERAGE: u32 = 125;

/// Price and filter settings for one mock symbol.
#[derive(Debug, Clone)]
pub struct MockMarket {
    pub mark_price: Decimal,
    pub liquidation_price: Decimal,
    pub step: u32,
    pub tick: u32,
}

/// One order as the mock venue stores it.
#[derive(Debug, Clone)]
pub struct MockOrder {
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub snapshot: OrderSnapshot,
}

/// A mock futures venue for deterministic testing.
pub struct MockVenue {
    name: String,
    balance: Mutex<AccountBalance>,
    markets: Mutex<HashMap<String, MockMarket>>,
    orders: Mutex<Vec<MockOrder>>,
    next_order_id: Mutex<OrderId>,
    margin_added: Mutex<Vec<(String, Decimal)>>,
    snapshot_calls: Mutex<usize>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
    /// Symbols whose calls fail.
    failing_symbols: Mutex<HashSet<String>>,
}

impl MockVenue {
    /// Create a mock with ETHUSDT (100, liq 95) and BTCUSDT (40000, liq 38000).
    pub fn new(free_balance: Decimal) -> Self {
        let mut markets = HashMap::new();
        markets.insert(
            "ETHUSDT".to_string(),
            MockMarket {
                mark_price: dec!(100),
                liquidation_price: dec!(95),
                step: 3,
                tick: 2,
            },
        );
        markets.insert(
            "BTCUSDT".to_string(),
            MockMarket {
                mark_price: dec!(40000),
                liquidation_price: dec!(38000),
                step: 3,
                tick: 1,
            },
        );

        Self {
            name: "mock".to_string(),
            balance: Mutex::new(AccountBalance {
                total: free_balance,
                free: free_balance,
            }),
            markets: Mutex::new(markets),
            orders: Mutex::new(Vec::new()),
            next_order_id: Mutex::new(1),
            margin_added: Mutex::new(Vec::new()),
            snapshot_calls: Mutex::new(0),
            force_error: Mutex::new(None),
            failing_symbols: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_market(&self, symbol: &str, market: MockMarket) {
        self.markets.lock().unwrap().insert(symbol.to_string(), market);
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Make every call touching `symbol` fail.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing_symbols.lock().unwrap().insert(symbol.to_string());
    }

    pub fn orders(&self) -> Vec<MockOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn margin_added(&self) -> Vec<(String, Decimal)> {
        self.margin_added.lock().unwrap().clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        *self.snapshot_calls.lock().unwrap()
    }

    /// Fill a resting order at its limit price.
    pub fn fill_order(&self, order_id: OrderId) {
        self.update_order(order_id, |o| {
            o.snapshot.status = OrderStatus::Filled;
            o.snapshot.executed_quantity = o.quantity;
            o.snapshot.average_price = o.price;
        });
    }

    /// Mark a resting order expired (the position was liquidated).
    pub fn expire_order(&self, order_id: OrderId) {
        self.update_order(order_id, |o| o.snapshot.status = OrderStatus::Expired);
    }

    pub fn cancel_order(&self, order_id: OrderId) {
        self.update_order(order_id, |o| o.snapshot.status = OrderStatus::Canceled);
    }

    pub fn set_order_status(&self, order_id: OrderId, status: &str) {
        self.update_order(order_id, |o| o.snapshot.status = OrderStatus::from(status));
    }

    fn update_order(&self, order_id: OrderId, f: impl FnOnce(&mut MockOrder)) {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.snapshot.order_id == order_id)
            .unwrap_or_else(|| panic!("no mock order {order_id}"));
        f(order);
    }

    fn check(&self, symbol: Option<&str>) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        if let Some(symbol) = symbol {
            if self.failing_symbols.lock().unwrap().contains(symbol) {
                return Err(anyhow!("simulated outage for {symbol}"));
            }
        }
        Ok(())
    }

    fn market(&self, symbol: &str) -> Result<MockMarket> {
        self.markets
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown symbol: {symbol}"))
    }

    fn push_order(&self, symbol: &str, side: OrderSide, price: Decimal, quantity: Decimal, filled: bool) -> OrderId {
        let mut next = self.next_order_id.lock().unwrap();
        let order_id = *next;
        *next += 1;

        let (status, executed, avg) = if filled {
            (OrderStatus::Filled, quantity, price)
        } else {
            (OrderStatus::New, Decimal::ZERO, Decimal::ZERO)
        };
        self.orders.lock().unwrap().push(MockOrder {
            side,
            price,
            quantity,
            snapshot: OrderSnapshot {
                order_id,
                symbol: symbol.to_string(),
                status,
                executed_quantity: executed,
                average_price: avg,
            },
        });
        order_id
    }

    /// Net filled quantity for a symbol.
    fn open_quantity(&self, symbol: &str) -> Decimal {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.snapshot.symbol == symbol && o.snapshot.status == OrderStatus::Filled)
            .map(|o| match o.side {
                OrderSide::Buy => o.snapshot.executed_quantity,
                OrderSide::Sell => -o.snapshot.executed_quantity,
            })
            .sum()
    }

    fn position(&self, symbol: &str) -> Result<PositionReport> {
        let market = self.market(symbol)?;
        let amount = self.open_quantity(symbol);
        Ok(PositionReport {
            symbol: symbol.to_string(),
            position_amount: amount,
            entry_price: if amount.is_zero() { Decimal::ZERO } else { market.mark_price },
            mark_price: market.mark_price,
            liquidation_price: if amount.is_zero() { Decimal::ZERO } else { market.liquidation_price },
            leverage: 20,
            unrealized_profit: Decimal::ZERO,
            isolated_wallet: Decimal::ZERO,
        })
    }
}

#[async_trait]
impl FuturesVenue for MockVenue {
    async fn get_free_balance(&self, _asset: &str) -> Result<AccountBalance> {
        self.check(None)?;
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_order_snapshot(&self, symbols: &[String]) -> Result<Vec<OrderSnapshot>> {
        self.check(None)?;
        *self.snapshot_calls.lock().unwrap() += 1;
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| symbols.contains(&o.snapshot.symbol))
            .map(|o| o.snapshot.clone())
            .collect())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<PositionReport> {
        self.check(Some(symbol))?;
        self.position(symbol)
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionReport>> {
        self.check(None)?;
        let symbols: Vec<String> = self.markets.lock().unwrap().keys().cloned().collect();
        let mut open = Vec::new();
        for symbol in symbols {
            let position = self.position(&symbol)?;
            if position.is_open() {
                open.push(position);
            }
        }
        Ok(open)
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        self.check(None)?;
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.snapshot.status == OrderStatus::New)
            .map(|o| OpenOrder {
                order_id: o.snapshot.order_id,
                symbol: o.snapshot.symbol.clone(),
                side: o.side,
                price: o.price,
                quantity: o.quantity,
                client_order_id: format!("mock-{}", o.snapshot.order_id),
                placed_at: Utc::now(),
            })
            .collect())
    }

    async fn get_max_leverage(&self, symbol: &str) -> Result<u32> {
        self.check(Some(symbol))?;
        self.market(symbol).map(|_| MOCK_MAX_LEVERAGE)
    }

    async fn submit_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderId> {
        self.check(Some(symbol))?;
        let market = self.market(symbol)?;
        Ok(self.push_order(symbol, OrderSide::Buy, market.mark_price, quantity, true))
    }

    async fn submit_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        _time_in_force: TimeInForce,
    ) -> Result<OrderId> {
        self.check(Some(symbol))?;
        self.market(symbol)?;
        Ok(self.push_order(symbol, OrderSide::Sell, price, quantity, false))
    }

    async fn add_isolated_margin(&self, symbol: &str, amount: Decimal) -> Result<()> {
        self.check(Some(symbol))?;
        self.margin_added.lock().unwrap().push((symbol.to_string(), amount));
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, _leverage: u32) -> Result<()> {
        self.check(Some(symbol))?;
        self.market(symbol).map(|_| ())
    }

    async fn get_step_size(&self, symbol: &str) -> Result<u32> {
        self.check(Some(symbol))?;
        Ok(self.market(symbol)?.step)
    }

    async fn get_tick_size(&self, symbol: &str) -> Result<u32> {
        self.check(Some(symbol))?;
        Ok(self.market(symbol)?.tick)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_market_buy_fills_at_mark() {
        let venue = MockVenue::new(dec!(1000));
        let id = venue.submit_market_buy("ETHUSDT", dec!(2.5)).await.unwrap();
        let snapshot = venue.get_order_snapshot(&["ETHUSDT".to_string()]).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].order_id, id);
        assert_eq!(snapshot[0].status, OrderStatus::Filled);
        assert_eq!(snapshot[0].average_price, dec!(100));

        let pos = venue.get_open_position("ETHUSDT").await.unwrap();
        assert_eq!(pos.position_amount, dec!(2.5));
        assert_eq!(pos.liquidation_price, dec!(95));
    }

    #[tokio::test]
    async fn test_mock_limit_sell_rests_until_filled() {
        let venue = MockVenue::new(dec!(1000));
        venue.submit_market_buy("ETHUSDT", dec!(2.5)).await.unwrap();
        let id = venue
            .submit_limit_sell("ETHUSDT", dec!(2.5), dec!(101), TimeInForce::Gtc)
            .await
            .unwrap();
        assert_eq!(venue.get_open_positions().await.unwrap().len(), 1);
        let open = venue.get_open_orders().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, id);

        venue.fill_order(id);
        let snapshot = venue.get_order_snapshot(&["ETHUSDT".to_string()]).await.unwrap();
        let sell = snapshot.iter().find(|o| o.order_id == id).unwrap();
        assert_eq!(sell.status, OrderStatus::Filled);
        assert_eq!(sell.average_price, dec!(101));
        assert!(venue.get_open_positions().await.unwrap().is_empty());
        assert!(venue.get_open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let venue = MockVenue::new(dec!(1000));
        venue.set_error("simulated disconnect");
        assert!(venue.get_free_balance("USDT").await.is_err());
        assert!(venue.get_order_snapshot(&[]).await.is_err());
        venue.clear_error();
        assert!(venue.get_free_balance("USDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_failing_symbol() {
        let venue = MockVenue::new(dec!(1000));
        venue.fail_symbol("BTCUSDT");
        assert!(venue.get_step_size("BTCUSDT").await.is_err());
        assert!(venue.get_step_size("ETHUSDT").await.is_ok());
    }
}
