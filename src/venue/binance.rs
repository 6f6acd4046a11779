//! Binance USD-M futures integration.
//!
//! REST API: https://binance-docs.github.io/apidocs/futures/en/
//! Base URL: https://fapi.binance.com (testnet: https://testnet.binancefuture.com)
//!
//! Account, order and position endpoints are SIGNED: the query string
//! carries `timestamp` and `recvWindow`, is signed with HMAC-SHA256 using
//! the API secret, and the hex digest is appended as `signature`. The API
//! key travels in the `X-MBX-APIKEY` header.
//!
//! All positions are opened in ISOLATED margin mode. The mode is set once
//! per symbol per process; Binance answers -4046 when it is already set.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::FuturesVenue;
use crate::strategy::precision::precision_from_size;
use crate::types::{
    AccountBalance, OpenOrder, OrderId, OrderSide, OrderSnapshot, OrderStatus, PositionReport,
    TimeInForce,
};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const VENUE_NAME: &str = "binance";
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Most recent orders fetched per symbol when building a snapshot.
const ALL_ORDERS_LIMIT: u32 = 100;

/// "No need to change margin type."
const ERR_MARGIN_TYPE_UNCHANGED: i64 = -4046;

// ---------------------------------------------------------------------------
// Binance API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    withdraw_available: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderEntry {
    order_id: u64,
    symbol: String,
    status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    avg_price: Decimal,
}

impl From<OrderEntry> for OrderSnapshot {
    fn from(o: OrderEntry) -> Self {
        OrderSnapshot {
            order_id: o.order_id,
            symbol: o.symbol,
            status: o.status,
            executed_quantity: o.executed_qty,
            average_price: o.avg_price,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    mark_price: Decimal,
    #[serde(rename = "unRealizedProfit", with = "rust_decimal::serde::str")]
    unrealized_profit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    liquidation_price: Decimal,
    leverage: String,
    #[serde(default, with = "rust_decimal::serde::str")]
    isolated_wallet: Decimal,
}

impl TryFrom<PositionRisk> for PositionReport {
    type Error = anyhow::Error;

    fn try_from(p: PositionRisk) -> Result<Self> {
        let leverage = p
            .leverage
            .parse::<u32>()
            .with_context(|| format!("Invalid leverage {:?} for {}", p.leverage, p.symbol))?;
        Ok(PositionReport {
            symbol: p.symbol,
            position_amount: p.position_amt,
            entry_price: p.entry_price,
            mark_price: p.mark_price,
            liquidation_price: p.liquidation_price,
            leverage,
            unrealized_profit: p.unrealized_profit,
            isolated_wallet: p.isolated_wallet,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderEntry {
    order_id: u64,
    symbol: String,
    side: OrderSide,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    orig_qty: Decimal,
    #[serde(default)]
    client_order_id: String,
    time: i64,
}

impl TryFrom<OpenOrderEntry> for OpenOrder {
    type Error = anyhow::Error;

    fn try_from(o: OpenOrderEntry) -> Result<Self> {
        let placed_at = DateTime::from_timestamp_millis(o.time)
            .ok_or_else(|| anyhow!("Invalid order time {} for order {}", o.time, o.order_id))?;
        Ok(OpenOrder {
            order_id: o.order_id,
            symbol: o.symbol,
            side: o.side,
            price: o.price,
            quantity: o.orig_qty,
            client_order_id: o.client_order_id,
            placed_at,
        })
    }
}

/// `leverageBracket` answers with a list, or a single object when a
/// symbol is given (depending on API version).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LeverageBracketResponse {
    Many(Vec<SymbolBrackets>),
    One(SymbolBrackets),
}

#[derive(Debug, Deserialize)]
struct SymbolBrackets {
    symbol: String,
    brackets: Vec<Bracket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bracket {
    initial_leverage: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderResponse {
    order_id: u64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<FilterEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterEntry {
    filter_type: String,
    #[serde(default)]
    step_size: Option<String>,
    #[serde(default)]
    tick_size: Option<String>,
}

/// Error body returned by Binance on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// A Binance API rejection with its numeric error code.
#[derive(Debug, thiserror::Error)]
#[error("Binance API error {status} on {path}: [{code}] {msg}")]
pub struct BinanceApiError {
    pub status: u16,
    pub path: String,
    pub code: i64,
    pub msg: String,
}

/// Quantity and price decimals for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolFilters {
    step: u32,
    tick: u32,
}

impl SymbolFilters {
    fn from_filters(filters: &[FilterEntry]) -> Result<Self> {
        let find = |kind: &str| filters.iter().find(|f| f.filter_type == kind);

        // MARKET_LOT_SIZE governs market orders; LOT_SIZE is the fallback.
        let step = find("MARKET_LOT_SIZE")
            .or_else(|| find("LOT_SIZE"))
            .and_then(|f| f.step_size.as_deref())
            .ok_or_else(|| anyhow!("No lot size filter"))?;
        let tick = find("PRICE_FILTER")
            .and_then(|f| f.tick_size.as_deref())
            .ok_or_else(|| anyhow!("No price filter"))?;

        let step: Decimal = step.parse().with_context(|| format!("Invalid stepSize {step}"))?;
        let tick: Decimal = tick.parse().with_context(|| format!("Invalid tickSize {tick}"))?;

        Ok(Self {
            step: precision_from_size(step),
            tick: precision_from_size(tick),
        })
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// API key and secret, kept out of logs and debug output.
pub struct BinanceCredentials {
    api_key: Secret<String>,
    api_secret: Secret<String>,
}

impl BinanceCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
        }
    }

    /// Read credentials from the named environment variables.
    pub fn from_env(key_env: &str, secret_env: &str) -> Result<Self> {
        let key = std::env::var(key_env)
            .with_context(|| format!("Environment variable not set: {key_env}"))?;
        let secret = std::env::var(secret_env)
            .with_context(|| format!("Environment variable not set: {secret_env}"))?;
        Ok(Self::new(key, secret))
    }
}

/// Hex-encoded HMAC-SHA256 of a query string.
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid API secret: {e}"))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `k=v&k=v` with URL-encoded values, in the given order.
fn build_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decimal in the plain form Binance expects (no trailing zeros).
fn wire_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceFuturesClient {
    http: Client,
    base_url: String,
    credentials: BinanceCredentials,
    recv_window_ms: u64,
    /// Exchange filters, loaded once per process.
    filters: Mutex<HashMap<String, SymbolFilters>>,
    /// Symbols already switched to isolated margin.
    isolated_symbols: Mutex<HashSet<String>>,
}

impl BinanceFuturesClient {
    pub fn with_options(
        credentials: BinanceCredentials,
        base_url: &str,
        recv_window_ms: u64,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build Binance HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
            filters: Mutex::new(HashMap::new()),
            isolated_symbols: Mutex::new(HashSet::new()),
        })
    }

    /// Send a signed request and decode the JSON body.
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut params = params.to_vec();
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = build_query(&params);
        let signature = sign_query(self.credentials.api_secret.expose_secret(), &query)?;
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        debug!(method = %method, path, "Signed Binance request");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", self.credentials.api_key.expose_secret().as_str())
            .send()
            .await
            .with_context(|| format!("Binance request to {path} failed"))?;

        Self::decode(resp, path).await
    }

    /// Send an unsigned GET (market data).
    async fn public<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Binance request to {path} failed"))?;

        Self::decode(resp, path).await
    }

    async fn decode<T: DeserializeOwned>(resp: Response, path: &str) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
                return Err(BinanceApiError {
                    status: status.as_u16(),
                    path: path.to_string(),
                    code: err.code,
                    msg: err.msg,
                }
                .into());
            }
            bail!("Binance API error {status} on {path}: {body}");
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse Binance response from {path}"))
    }

    async fn positions(&self, symbol: Option<&str>) -> Result<Vec<PositionReport>> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();
        let raw: Vec<PositionRisk> = self.signed(Method::GET, "/fapi/v2/positionRisk", &params).await?;
        raw.into_iter().map(PositionReport::try_from).collect()
    }

    /// Switch a symbol to isolated margin once per process.
    async fn ensure_isolated(&self, symbol: &str) -> Result<()> {
        {
            let done = self
                .isolated_symbols
                .lock()
                .map_err(|_| anyhow!("Margin type cache poisoned"))?;
            if done.contains(symbol) {
                return Ok(());
            }
        }

        let params = [
            ("symbol", symbol.to_string()),
            ("marginType", "ISOLATED".to_string()),
        ];
        match self
            .signed::<serde_json::Value>(Method::POST, "/fapi/v1/marginType", &params)
            .await
        {
            Ok(_) => info!(symbol, "Margin type set to ISOLATED"),
            Err(e) => match e.downcast_ref::<BinanceApiError>() {
                Some(api) if api.code == ERR_MARGIN_TYPE_UNCHANGED => {
                    debug!(symbol, "Margin type already ISOLATED");
                }
                _ => return Err(e),
            },
        }

        self.isolated_symbols
            .lock()
            .map_err(|_| anyhow!("Margin type cache poisoned"))?
            .insert(symbol.to_string());
        Ok(())
    }

    /// Filters for one symbol. A symbol missing from the cache reloads
    /// exchange info (new listings).
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        {
            let cache = self.filters.lock().map_err(|_| anyhow!("Filter cache poisoned"))?;
            if let Some(f) = cache.get(symbol) {
                return Ok(*f);
            }
        }

        let info: ExchangeInfo = self.public("/fapi/v1/exchangeInfo").await?;
        let mut cache = self.filters.lock().map_err(|_| anyhow!("Filter cache poisoned"))?;
        for s in &info.symbols {
            match SymbolFilters::from_filters(&s.filters) {
                Ok(f) => {
                    cache.insert(s.symbol.clone(), f);
                }
                Err(e) => debug!(symbol = %s.symbol, error = %e, "Skipping symbol filters"),
            }
        }
        info!(symbols = cache.len(), "Exchange filters loaded");

        cache
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("Symbol {symbol} not listed on {VENUE_NAME}"))
    }

    async fn new_order(&self, params: Vec<(&str, String)>, side: OrderSide) -> Result<OrderId> {
        let mut params = params;
        params.push(("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()));
        let resp: NewOrderResponse = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        debug!(
            order_id = resp.order_id,
            side = %side,
            status = resp.status.as_deref().unwrap_or("?"),
            "Order accepted"
        );
        Ok(resp.order_id)
    }
}

// ---------------------------------------------------------------------------
// FuturesVenue trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl FuturesVenue for BinanceFuturesClient {
    async fn get_free_balance(&self, asset: &str) -> Result<AccountBalance> {
        let balances: Vec<BalanceEntry> = self.signed(Method::GET, "/fapi/v2/balance", &[]).await?;
        balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| AccountBalance {
                total: b.balance,
                free: b.withdraw_available,
            })
            .ok_or_else(|| anyhow!("Asset {asset} not found in futures account"))
    }

    async fn get_order_snapshot(&self, symbols: &[String]) -> Result<Vec<OrderSnapshot>> {
        // allOrders is per symbol; merge into one snapshot
        let unique: BTreeSet<&String> = symbols.iter().collect();
        let mut snapshot = Vec::new();
        for symbol in unique {
            let params = [
                ("symbol", symbol.clone()),
                ("limit", ALL_ORDERS_LIMIT.to_string()),
            ];
            let orders: Vec<OrderEntry> =
                self.signed(Method::GET, "/fapi/v1/allOrders", &params).await?;
            snapshot.extend(orders.into_iter().map(OrderSnapshot::from));
        }
        debug!(orders = snapshot.len(), "Order snapshot fetched");
        Ok(snapshot)
    }

    async fn get_open_position(&self, symbol: &str) -> Result<PositionReport> {
        self.positions(Some(symbol))
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| anyhow!("No position information for {symbol}"))
    }

    async fn get_open_positions(&self) -> Result<Vec<PositionReport>> {
        Ok(self
            .positions(None)
            .await?
            .into_iter()
            .filter(PositionReport::is_open)
            .collect())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        let raw: Vec<OpenOrderEntry> = self.signed(Method::GET, "/fapi/v1/openOrders", &[]).await?;
        raw.into_iter().map(OpenOrder::try_from).collect()
    }

    async fn get_max_leverage(&self, symbol: &str) -> Result<u32> {
        let params = [("symbol", symbol.to_string())];
        let resp: LeverageBracketResponse = self
            .signed(Method::GET, "/fapi/v1/leverageBracket", &params)
            .await?;
        let entries = match resp {
            LeverageBracketResponse::Many(v) => v,
            LeverageBracketResponse::One(b) => vec![b],
        };
        // the first bracket carries the highest initial leverage
        entries
            .into_iter()
            .find(|b| b.symbol == symbol)
            .and_then(|b| b.brackets.first().map(|br| br.initial_leverage))
            .ok_or_else(|| anyhow!("No leverage brackets for {symbol}"))
    }

    async fn submit_market_buy(&self, symbol: &str, quantity: Decimal) -> Result<OrderId> {
        self.ensure_isolated(symbol).await?;
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", OrderSide::Buy.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", wire_decimal(quantity)),
        ];
        self.new_order(params, OrderSide::Buy).await
    }

    async fn submit_limit_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        time_in_force: TimeInForce,
    ) -> Result<OrderId> {
        self.ensure_isolated(symbol).await?;
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", OrderSide::Sell.to_string()),
            ("type", "LIMIT".to_string()),
            ("quantity", wire_decimal(quantity)),
            ("price", wire_decimal(price)),
            ("timeInForce", time_in_force.to_string()),
        ];
        self.new_order(params, OrderSide::Sell).await
    }

    async fn add_isolated_margin(&self, symbol: &str, amount: Decimal) -> Result<()> {
        // type 1 = add, 2 = reduce
        let params = [
            ("symbol", symbol.to_string()),
            ("amount", wire_decimal(amount)),
            ("type", "1".to_string()),
        ];
        let _: serde_json::Value = self
            .signed(Method::POST, "/fapi/v1/positionMargin", &params)
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: serde_json::Value = self.signed(Method::POST, "/fapi/v1/leverage", &params).await?;
        Ok(())
    }

    async fn get_step_size(&self, symbol: &str) -> Result<u32> {
        Ok(self.symbol_filters(symbol).await?.step)
    }

    async fn get_tick_size(&self, symbol: &str) -> Result<u32> {
        let tick = self.symbol_filters(symbol).await?.tick;
        if tick == 0 {
            warn!(symbol, "No tick size restriction reported; prices left unrounded");
        }
        Ok(tick)
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
