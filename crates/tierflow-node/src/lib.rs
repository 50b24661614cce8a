//! # Tierflow Node
//!
//! The compensation service: a [`CompensationEngine`] wired to a ledger,
//! a price oracle and a KYC provider, plus the configuration and read-model
//! types around it.

pub mod config;
pub mod engine;
pub mod kyc;
pub mod pricing;
pub mod read_model;

pub use config::NodeConfig;
pub use engine::{CompensationEngine, DistributionRun, Registration, Upgrade};
pub use kyc::{KycGate, KycProvider, StaticKycProvider};
pub use pricing::{FixedPriceOracle, PriceOracle, PriceQuote, PricingAdapter};
pub use read_model::{GlobalStats, MatrixPosition, PoolSnapshot, UserSnapshot};

/// Current wall-clock time as a ledger timestamp
pub fn unix_now() -> tierflow_core::Timestamp {
    chrono::Utc::now().timestamp()
}
