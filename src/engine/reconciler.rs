//! Order reconciler: copies one venue order snapshot onto the wallets.
//!
//! Only status, executed quantity and average price are copied; balances
//! move in the wallet transitions. An order missing from the snapshot
//! keeps its last known status.

use std::collections::HashMap;
use tracing::debug;

use super::wallet::Wallet;
use crate::types::{OrderId, OrderSnapshot};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub matched: usize,
    pub missing: usize,
}

pub fn reconcile<'a>(
    snapshot: &[OrderSnapshot],
    wallets: impl IntoIterator<Item = &'a mut Wallet>,
) -> ReconcileSummary {
    let by_id: HashMap<OrderId, &OrderSnapshot> =
        snapshot.iter().map(|o| (o.order_id, o)).collect();
    let mut summary = ReconcileSummary::default();

    for wallet in wallets {
        if let Some(id) = wallet.buy_order_id {
            match by_id.get(&id) {
                Some(order) => {
                    wallet.buy_order_status = order.status.clone();
                    wallet.buy_executed_quantity = order.executed_quantity;
                    wallet.buy_average_price = order.average_price;
                    summary.matched += 1;
                }
                None => {
                    debug!(wallet_id = wallet.wallet_id, symbol = %wallet.symbol, order_id = id, "Buy order not in snapshot");
                    summary.missing += 1;
                }
            }
        }
        if let Some(id) = wallet.sell_order_id {
            match by_id.get(&id) {
                Some(order) => {
                    wallet.sell_order_status = order.status.clone();
                    wallet.sell_executed_quantity = order.executed_quantity;
                    wallet.sell_average_price = order.average_price;
                    summary.matched += 1;
                }
                None => {
                    debug!(wallet_id = wallet.wallet_id, symbol = %wallet.symbol, order_id = id, "Sell order not in snapshot");
                    summary.missing += 1;
                }
            }
        }
    }

    debug!(matched = summary.matched, missing = summary.missing, orders = snapshot.len(), "Orders reconciled");
    summary
}
