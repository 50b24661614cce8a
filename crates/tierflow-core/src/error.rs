//! Error types for Tierflow compensation operations

use crate::types::{Address, Amount, UserId};
use thiserror::Error;

/// Result type alias for compensation operations
pub type Result<T> = std::result::Result<T, CompensationError>;

/// Errors that abort a ledger transaction
///
/// Cap truncation and a distribution that is not yet due are outcomes, not
/// errors: they are reported in receipts and progress reports instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompensationError {
    // === Registration & Placement ===
    /// Sponsor missing, inactive or blacklisted
    #[error("Invalid sponsor: {0}")]
    InvalidSponsor(String),

    /// Sponsor chain would revisit the new user
    #[error("Cyclic sponsor chain through {0}")]
    CyclicSponsor(UserId),

    /// Address already has a user row
    #[error("Address already registered: {0}")]
    AlreadyRegistered(Address),

    /// Unknown tier, or an upgrade that is not strictly higher
    #[error("Invalid package level: {0}")]
    InvalidPackageLevel(u8),

    /// Payment does not cover the package price
    #[error("Payment mismatch: expected {expected}, received {received}")]
    PaymentMismatch { expected: Amount, received: Amount },

    /// KYC is required and the user is not verified
    #[error("KYC verification required for {0}")]
    KycRequired(Address),

    // === Account state ===
    /// Account is blacklisted
    #[error("Account is blacklisted: {0}")]
    Blacklisted(Address),

    /// Platform is paused
    #[error("Platform is paused")]
    Paused,

    /// No user row for the given reference
    #[error("User not found: {0}")]
    UserNotFound(String),

    // === Withdrawals ===
    /// Requested more than the withdrawable balance
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Amount, available: Amount },

    /// Requested less than the configured minimum
    #[error("Withdrawal below minimum of {minimum}")]
    BelowMinimumWithdrawal { minimum: Amount },

    /// Daily circuit breaker tripped
    #[error("Daily withdrawal limit exceeded: limit {limit}, already withdrawn {withdrawn}")]
    DailyLimitExceeded { limit: Amount, withdrawn: Amount },

    // === Pricing ===
    /// No fresh price available
    #[error("Oracle price stale for {0}")]
    OracleStale(String),

    /// Fresh price deviates too far from the last known good quote
    #[error("Oracle price for {asset} deviates {deviation_bps} bps from last known good")]
    OracleDeviation { asset: String, deviation_bps: u128 },

    // === Configuration & Storage ===
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CompensationError {
    /// Stable error code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidSponsor(_) => 2001,
            Self::CyclicSponsor(_) => 2002,
            Self::AlreadyRegistered(_) => 2003,
            Self::InvalidPackageLevel(_) => 2004,
            Self::PaymentMismatch { .. } => 2005,
            Self::KycRequired(_) => 2006,
            Self::Blacklisted(_) => 2007,
            Self::Paused => 2008,
            Self::UserNotFound(_) => 2009,
            Self::InsufficientBalance { .. } => 3001,
            Self::BelowMinimumWithdrawal { .. } => 3002,
            Self::DailyLimitExceeded { .. } => 3003,
            Self::OracleStale(_) => 4001,
            Self::OracleDeviation { .. } => 4002,
            _ => 9999,
        }
    }

    /// Check if the same call may succeed later without caller changes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Paused
                | Self::DailyLimitExceeded { .. }
                | Self::OracleStale(_)
                | Self::OracleDeviation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CompensationError::Paused.code(), 2008);
        assert_eq!(
            CompensationError::BelowMinimumWithdrawal { minimum: 10 }.code(),
            3002
        );
        assert_eq!(CompensationError::Storage("disk".into()).code(), 9999);
    }

    #[test]
    fn test_error_display() {
        let err = CompensationError::InsufficientBalance {
            requested: 5,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("requested 5"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(CompensationError::OracleStale("BNB".into()).is_recoverable());
        assert!(!CompensationError::CyclicSponsor(UserId::new(1)).is_recoverable());
    }
}
