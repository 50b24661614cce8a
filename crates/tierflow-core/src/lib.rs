//! # Tierflow Core
//!
//! Shared building blocks for the Tierflow compensation engine:
//! - identifiers (`UserId`, `NodeId`, `Address`) and micro-unit amounts
//! - packages and the basis-point split of each payment
//! - closed enums with rate tables (`PoolKind`, `LeaderRank`, `WithdrawalTier`)
//! - the compensation plan (`CompensationConfig`)
//! - the error taxonomy (`CompensationError`)
//!
//! ## Payment Split
//!
//! ```text
//!   payment ──┬── 40% direct ──────► sponsor
//!             ├── 10% level ───────► sponsor levels 1..10
//!             ├── 10% upline ──────► ancestors 1..30 (equal shares)
//!             ├── 10% leader ──────► leader bonus pool
//!             └── 30% help ────────► global help pool
//! ```

pub mod config;
pub mod error;
pub mod package;
pub mod types;

pub use config::*;
pub use error::*;
pub use package::*;
pub use types::*;

/// Unit constants
pub mod constants {
    /// Micro-units per quote-currency unit (6 decimals)
    pub const ONE_USD: u128 = 1_000_000;

    /// 100% in basis points
    pub const BPS_DENOMINATOR: u128 = 10_000;

    /// Seconds in a day
    pub const SECONDS_PER_DAY: i64 = 24 * 3600;
}

pub use constants::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::CompensationConfig;
    pub use crate::error::{CompensationError, Result};
    pub use crate::types::*;
}
