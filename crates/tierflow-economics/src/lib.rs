//! # Tierflow Economics
//!
//! The compensation rules, expressed as operations on a ledger
//! [`Transaction`](tierflow_storage::Transaction). Each component only
//! mutates rows; the caller decides the transaction boundary.
//!
//! | Component | Operation |
//! |-----------|-----------|
//! | [`PlacementEngine`] | sponsor tree link, binary matrix slot, rank updates |
//! | [`BonusDistributor`] | split a payment into direct, level, upline and pool shares |
//! | [`PoolAccountant`] | accrue pools, batched resumable distribution cycles |
//! | [`WithdrawalProcessor`] | tiered payout/reinvest split with fee and daily limit |
//!
//! ## Conservation
//!
//! Every unit of a payment ends up in exactly one place: a user's balance,
//! a pool, or the reserve. [`DistributionReceipt::total_credited`] always
//! equals the payment amount.

pub mod bonus;
pub mod placement;
pub mod pools;
pub mod receipt;
pub mod withdrawal;

pub use bonus::BonusDistributor;
pub use placement::{Placement, PlacementEngine};
pub use pools::{accrue_pool, DistributionProgress, DistributionStatus, PoolAccountant};
pub use receipt::{Credit, CreditReason, DistributionReceipt, Recipient};
pub use withdrawal::{ReinvestBreakdown, WithdrawalProcessor, WithdrawalReceipt};
