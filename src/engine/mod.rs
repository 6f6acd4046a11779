//! Core engine: wallets, reconciliation and the per-cycle loop.

pub mod wallet;
pub mod reconciler;
pub mod executor;
pub mod accountant;
pub mod portfolio;
