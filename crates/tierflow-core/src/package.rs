//! # Packages
//!
//! Tiered packages and the basis-point split of every payment.
//!
//! | Stream | Share | Recipient |
//! |--------|-------|-----------|
//! | Direct | 40% | immediate sponsor |
//! | Level | 10% | sponsor levels 1-10 |
//! | Upline | 10% | up to 30 ancestors |
//! | Leader | 10% | leader bonus pool |
//! | Help | 30% | global help pool |

use serde::{Deserialize, Serialize};

use crate::constants::BPS_DENOMINATOR;
use crate::types::{usd, Amount};

/// A purchasable package tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// 1-based tier id
    pub tier: u8,
    /// Price in whole quote-currency units
    pub price_usd: u64,
}

impl Package {
    pub fn new(tier: u8, price_usd: u64) -> Self {
        Self { tier, price_usd }
    }

    /// Price in micro-units
    pub fn price(&self) -> Amount {
        usd(self.price_usd)
    }
}

/// Basis-point allocation of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub direct_bps: u32,
    pub level_bps: u32,
    pub upline_bps: u32,
    pub leader_bps: u32,
    pub help_bps: u32,
}

impl Default for Allocation {
    fn default() -> Self {
        Self {
            direct_bps: 4_000,
            level_bps: 1_000,
            upline_bps: 1_000,
            leader_bps: 1_000,
            help_bps: 3_000,
        }
    }
}

impl Allocation {
    pub fn total_bps(&self) -> u128 {
        self.direct_bps as u128
            + self.level_bps as u128
            + self.upline_bps as u128
            + self.leader_bps as u128
            + self.help_bps as u128
    }

    /// True when the streams cover exactly 100%
    pub fn is_complete(&self) -> bool {
        self.total_bps() == BPS_DENOMINATOR
    }
}

/// The packages sold by the original platform
pub fn default_packages() -> Vec<Package> {
    vec![
        Package::new(1, 30),
        Package::new(2, 50),
        Package::new(3, 100),
        Package::new(4, 200),
    ]
}
