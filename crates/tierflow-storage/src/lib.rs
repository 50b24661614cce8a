//! # Tierflow Storage
//!
//! Ledger store for the compensation engine.
//!
//! ## Tables
//!
//! - `users` - keyed by `UserId`, with an address index
//! - `nodes` - binary matrix nodes keyed by `NodeId`
//! - `sponsored` - sponsor tree edges (sponsor → direct children)
//! - `pools` - one row per `PoolKind`, with the distribution cursor
//! - `globals` - pause/KYC switches, daily withdrawal counter, totals
//!
//! The whole state is persisted as one bincode snapshot (`ledger.bin`)
//! after every committed transaction.

pub mod ledger;
pub mod model;

pub use ledger::{Ledger, Transaction, SNAPSHOT_FILE};
pub use model::{DistributionCycle, GlobalState, LedgerState, MatrixNode, Pool, Side, User};
