//! Core type definitions for Tierflow
//!
//! Identifiers, money helpers, and the closed enums (pool kinds, leader ranks,
//! withdrawal tiers) that carry explicit rate tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{BPS_DENOMINATOR, ONE_USD};
use crate::error::CompensationError;

/// Quote-currency amount in micro-units (6 decimals)
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Apply a basis-point rate to an amount, truncating
pub fn apply_bps(amount: Amount, bps: u32) -> Amount {
    amount * bps as u128 / BPS_DENOMINATOR
}

/// Whole dollars to micro-units
pub const fn usd(dollars: u64) -> Amount {
    dollars as u128 * ONE_USD
}

/// Arena index of a user row
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Arena index of a binary matrix node
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// External account address (20 bytes, hex encoded)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Create an address from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive a deterministic address from an arbitrary label using BLAKE3
    pub fn from_label(label: &[u8]) -> Self {
        let hash = blake3::hash(label);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[..20]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Default referral code: the last four bytes, upper-case hex
    pub fn referral_code(&self) -> String {
        hex::encode_upper(&self.0[16..])
    }

    /// Parse from hex, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, CompensationError> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(trimmed)
            .map_err(|e| CompensationError::InvalidInput(format!("address {}: {}", s, e)))?;
        if raw.len() != 20 {
            return Err(CompensationError::InvalidInput(format!(
                "address {} must be 20 bytes, got {}",
                s,
                raw.len()
            )));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = CompensationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Shared pools fed by payments, withdrawals and admin top-ups
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Leader bonus pool, paid to ranked leaders
    LeaderBonus,
    /// Global help pool (GHP)
    GlobalHelp,
    /// Club pool for top-tier holders
    Club,
    /// Level share of reinvested withdrawals
    LevelReinvest,
    /// Upline share of reinvested withdrawals
    UplineReinvest,
}

impl PoolKind {
    pub const ALL: [PoolKind; 5] = [
        PoolKind::LeaderBonus,
        PoolKind::GlobalHelp,
        PoolKind::Club,
        PoolKind::LevelReinvest,
        PoolKind::UplineReinvest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LeaderBonus => "leader",
            Self::GlobalHelp => "help",
            Self::Club => "club",
            Self::LevelReinvest => "level-reinvest",
            Self::UplineReinvest => "upline-reinvest",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PoolKind {
    type Err = CompensationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PoolKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CompensationError::InvalidInput(format!("unknown pool kind: {}", s)))
    }
}

/// Leader rank, ordered from lowest to highest
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LeaderRank {
    #[default]
    None,
    ShiningStar,
    SilverStar,
}

impl LeaderRank {
    /// Shares in the leader bonus pool
    pub fn is_leader(&self) -> bool {
        *self != Self::None
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ShiningStar => "Shining Star",
            Self::SilverStar => "Silver Star",
        }
    }
}

/// Withdrawal tier derived from direct referral count
///
/// | Tier | Direct referrals | Withdraw | Reinvest |
/// |------|------------------|----------|----------|
/// | Starter | 0-4 | 70% | 30% |
/// | Builder | 5-19 | 75% | 25% |
/// | Leader | 20+ | 80% | 20% |
/// | AutoCompound | any (opt-in) | 0% | 100% |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalTier {
    Starter,
    Builder,
    Leader,
    AutoCompound,
}

impl WithdrawalTier {
    pub const ALL: [WithdrawalTier; 4] = [
        WithdrawalTier::Starter,
        WithdrawalTier::Builder,
        WithdrawalTier::Leader,
        WithdrawalTier::AutoCompound,
    ];

    /// Resolve the tier for a user
    pub fn for_user(direct_referrals: u64, auto_compound: bool) -> Self {
        if auto_compound {
            return Self::AutoCompound;
        }
        match direct_referrals {
            0..=4 => Self::Starter,
            5..=19 => Self::Builder,
            _ => Self::Leader,
        }
    }

    pub fn withdraw_percent(&self) -> u8 {
        match self {
            Self::Starter => 70,
            Self::Builder => 75,
            Self::Leader => 80,
            Self::AutoCompound => 0,
        }
    }

    pub fn reinvest_percent(&self) -> u8 {
        match self {
            Self::Starter => 30,
            Self::Builder => 25,
            Self::Leader => 20,
            Self::AutoCompound => 100,
        }
    }
}

/// Asset a payment is made in
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentAsset {
    /// Quote-currency stablecoin, amount already in micro-units
    Stable,
    /// Volatile asset priced through the oracle
    Volatile { symbol: String, decimals: u8 },
}

/// A payment accompanying a registration or upgrade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub asset: PaymentAsset,
    /// Amount in the asset's smallest unit
    pub amount: u128,
}

impl Payment {
    pub fn stable(amount: Amount) -> Self {
        Self {
            asset: PaymentAsset::Stable,
            amount,
        }
    }

    pub fn volatile(symbol: impl Into<String>, decimals: u8, amount: u128) -> Self {
        Self {
            asset: PaymentAsset::Volatile {
                symbol: symbol.into(),
                decimals,
            },
            amount,
        }
    }
}
