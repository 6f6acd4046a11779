//! End-to-end wallet lifecycle runs against the in-memory venue.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

use staker::config::AppConfig;
use staker::engine::executor::Executor;
use staker::engine::portfolio::{Portfolio, PortfolioSettings};
use staker::engine::wallet::{Wallet, WalletState};
use staker::strategy::kelly::{KellyCalculator, KellyConfig};
use staker::strategy::StakePlanner;
use staker::types::{OrderSide, StakerError, TimeInForce};
use staker::venue::FuturesVenue;

use crate::mock_venue::{MockMarket, MockVenue};

async fn make_portfolio(
    venue: &Arc<MockVenue>,
    wallets: Vec<Wallet>,
    margin_factor: Decimal,
    dry_run: bool,
) -> Result<Portfolio, StakerError> {
    let shared: Arc<dyn FuturesVenue> = venue.clone();
    Portfolio::new(
        wallets,
        shared,
        StakePlanner::new(KellyCalculator::new(KellyConfig {
            margin_factor,
            ..KellyConfig::default()
        })),
        Executor::new(TimeInForce::Gtc, dry_run),
        PortfolioSettings {
            bet_pause: Duration::ZERO,
            ..PortfolioSettings::default()
        },
        Span::none(),
    )
    .await
}

fn eth_wallet() -> Wallet {
    Wallet::new(44, "ETHUSDT", dec!(100), 20)
}

/// Id of the most recent order on one side.
fn last_order(venue: &MockVenue, side: OrderSide) -> u64 {
    venue
        .orders()
        .iter()
        .rev()
        .find(|o| o.side == side)
        .map(|o| o.snapshot.order_id)
        .unwrap()
}

#[tokio::test]
async fn test_winning_round_returns_gain() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    // Cycle 1: idle wallet bets 2.5 @ 100 with a take-profit at 101
    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.bets_placed, 1);
    let orders = venue.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].quantity, dec!(2.5));
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert_eq!(orders[1].price, dec!(101));
    assert!(venue.margin_added().is_empty());
    assert_eq!(portfolio.wallet(44).unwrap().state(), WalletState::BuyPending);
    assert_eq!(report.open_orders, Some(1));
    assert_eq!(report.open_positions, Some(1));

    // Cycle 2: buy fill booked, margin debited
    portfolio.run_cycle().await;
    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.state(), WalletState::PositionOpen);
    assert_eq!(w.balance, dec!(87.5));
    assert_eq!(w.liquidation_price, dec!(95));

    // Cycle 3: take-profit fills; wallet is credited and bets again
    venue.fill_order(last_order(&venue, OrderSide::Sell));
    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.wins, 1);
    assert_eq!(report.stats.bets_placed, 1);

    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.balance, dec!(102.5));
    assert_eq!(w.wins, 1);
    assert_eq!(w.bets_placed, 2);
    assert_eq!(w.state(), WalletState::BuyPending);
    assert_eq!(venue.snapshot_calls(), 3);
}

#[tokio::test]
async fn test_liquidation_leaves_wallet_below_start() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    venue.set_market(
        "ETHUSDT",
        MockMarket {
            mark_price: dec!(100),
            liquidation_price: dec!(96),
            step: 3,
            tick: 2,
        },
    );
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    portfolio.run_cycle().await;
    assert_eq!(portfolio.wallet(44).unwrap().balance, dec!(87.5));

    venue.expire_order(last_order(&venue, OrderSide::Sell));
    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.losses, 1);

    let w = portfolio.wallet(44).unwrap();
    // 87.5 + (12.5 - 250 + 240)
    assert_eq!(w.balance, dec!(90));
    assert!(w.balance < w.initial_balance);
    assert_eq!(w.losses, 1);
}

#[tokio::test]
async fn test_exit_filled_before_entry_booked() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    // take-profit fills before the next cycle has booked the entry
    venue.fill_order(last_order(&venue, OrderSide::Sell));

    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.stats.wins, 1);
    assert_eq!(report.stats.bets_placed, 1);

    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.balance, dec!(102.5));
    assert_eq!(w.wins, 1);
    assert_eq!(w.bets_placed, 2);
    assert_eq!(w.state(), WalletState::BuyPending);
}

#[tokio::test]
async fn test_liquidated_before_entry_booked() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    venue.expire_order(last_order(&venue, OrderSide::Sell));

    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.stats.losses, 1);

    // booked at the planned liquidation price 95: 12.5 - 250 + 237.5
    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.balance, dec!(87.5));
    assert_eq!(w.losses, 1);
    assert_eq!(w.bets_placed, 2);
}

#[tokio::test]
async fn test_split_margin_conserves_capital() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], dec!(2), false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    assert_eq!(venue.margin_added(), vec![("ETHUSDT".to_string(), dec!(6.25))]);
    let orders = venue.orders();
    assert_eq!(orders[0].quantity, dec!(1.25));
    assert_eq!(orders[1].price, dec!(102));

    portfolio.run_cycle().await;
    assert_eq!(portfolio.wallet(44).unwrap().balance, dec!(87.5));

    venue.fill_order(last_order(&venue, OrderSide::Sell));
    portfolio.run_cycle().await;
    assert_eq!(portfolio.wallet(44).unwrap().balance, dec!(102.5));
}

#[tokio::test]
async fn test_canceled_exit_frees_wallet() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    portfolio.run_cycle().await;
    venue.cancel_order(last_order(&venue, OrderSide::Sell));
    let report = portfolio.run_cycle().await;

    assert_eq!(report.stats.cancellations, 1);
    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.balance, dec!(87.5));
    assert_eq!(w.cancellations, 1);
    // a fresh round started in the same cycle
    assert_eq!(w.bets_placed, 2);
}

#[tokio::test]
async fn test_unrecognized_exit_state_is_left_alone() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    portfolio.run_cycle().await;
    portfolio.run_cycle().await;
    let sell_id = last_order(&venue, OrderSide::Sell);
    venue.set_order_status(sell_id, "PARTIALLY_FILLED");

    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.errors, 1);
    assert_eq!(report.stats.bets_placed, 0);
    let w = portfolio.wallet(44).unwrap();
    assert_eq!(w.sell_order_id, Some(sell_id));
    assert_eq!(w.balance, dec!(87.5));
}

#[tokio::test]
async fn test_insufficient_funds_places_nothing() {
    let venue = Arc::new(MockVenue::new(dec!(150)));
    let wallets = vec![eth_wallet(), Wallet::new(11, "BTCUSDT", dec!(100), 20)];
    let result = make_portfolio(&venue, wallets, Decimal::ONE, false).await;

    match result {
        Err(StakerError::InsufficientFunds { requested, available }) => {
            assert_eq!(requested, dec!(200));
            assert_eq!(available, dec!(150));
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("expected InsufficientFunds"),
    }
    assert!(venue.orders().is_empty());
}

#[tokio::test]
async fn test_one_wallet_failure_does_not_stop_others() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    venue.fail_symbol("BTCUSDT");
    let wallets = vec![Wallet::new(11, "BTCUSDT", dec!(500), 20), eth_wallet()];
    let mut portfolio = make_portfolio(&venue, wallets, Decimal::ONE, false)
        .await
        .unwrap();

    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.bets_placed, 1);
    assert_eq!(report.stats.bets_failed, 1);
    assert!(portfolio.wallet(11).unwrap().is_eligible());
    assert_eq!(portfolio.wallet(44).unwrap().state(), WalletState::BuyPending);
}

#[tokio::test]
async fn test_venue_outage_is_survived() {
    let venue = Arc::new(MockVenue::new(dec!(1000)));
    let mut portfolio = make_portfolio(&venue, vec![eth_wallet()], Decimal::ONE, false)
        .await
        .unwrap();

    venue.set_error("simulated disconnect");
    let report = portfolio.run_cycle().await;
    assert!(report.stats.errors >= 1);
    assert_eq!(report.stats.bets_failed, 1);
    assert!(venue.orders().is_empty());

    venue.clear_error();
    let report = portfolio.run_cycle().await;
    assert_eq!(report.stats.bets_placed, 1);
}

#[tokio::test]
async fn test_dry_run_from_config_submits_nothing() {
    let cfg = AppConfig::parse(
        r#"
[agent]
name = "dry"
dry_run = true
bet_pause_ms = 0

[[wallets]]
wallet_id = 11
symbol = "BTCUSDT"
balance_fraction = 0.5
leverage = 20

[[wallets]]
wallet_id = 44
symbol = "ETHUSDT"
balance_fraction = 0.5
leverage = 20
"#,
    )
    .unwrap();

    let venue = Arc::new(MockVenue::new(dec!(999)));
    let shared: Arc<dyn FuturesVenue> = venue.clone();
    let mut portfolio = Portfolio::from_config(&cfg, shared, Span::none())
        .await
        .unwrap();

    assert_eq!(portfolio.wallet(11).unwrap().balance, dec!(499));
    assert_eq!(portfolio.wallet(44).unwrap().balance, dec!(499));

    let report = portfolio.run_cycle().await;
    assert_eq!(report.idle, 2);
    assert_eq!(report.stats.bets_placed, 0);
    assert!(venue.orders().is_empty());
}
