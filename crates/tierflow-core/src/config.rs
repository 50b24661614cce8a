//! Compensation plan configuration
//!
//! Business parameters shared by every engine component. Loaded from the
//! `[compensation]` section of the node config.

use serde::{Deserialize, Serialize};

use crate::constants::{BPS_DENOMINATOR, SECONDS_PER_DAY};
use crate::error::{CompensationError, Result};
use crate::package::{default_packages, Allocation, Package};
use crate::types::{usd, Amount, LeaderRank, PoolKind};

/// Where shares without an eligible recipient go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemainderSink {
    /// Credit the global help pool
    #[default]
    GlobalHelpPool,
    /// Hold in the platform reserve, outside the pools
    Reserve,
}

/// How the global help pool is split among eligible users
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelpPoolWeighting {
    /// Equal share per eligible user
    #[default]
    Equal,
    /// Pro-rata by remaining cap headroom
    CapHeadroom,
}

/// Complete compensation plan
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompensationConfig {
    /// Package tiers, ordered by tier id
    #[serde(default = "default_packages")]
    pub packages: Vec<Package>,

    /// Split of each payment
    #[serde(default)]
    pub allocation: Allocation,

    /// Level bonus rate per sponsor level, level 1 first
    #[serde(default = "default_level_rates")]
    pub level_rates_bps: Vec<u32>,

    /// Ancestors sharing the upline bonus
    #[serde(default = "default_upline_levels")]
    pub upline_levels: u32,

    /// Earnings cap as a multiple of total invested
    #[serde(default = "default_cap_multiplier")]
    pub cap_multiplier: u32,

    /// Destination of unallocated shares
    #[serde(default)]
    pub remainder_sink: RemainderSink,

    /// Global help pool weighting policy
    #[serde(default)]
    pub help_pool_weighting: HelpPoolWeighting,

    /// Whether KYC is required when the ledger is first created
    #[serde(default)]
    pub kyc_required: bool,

    /// Withdrawal rules
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,

    /// Pool distribution cadence
    #[serde(default)]
    pub pools: PoolSchedule,

    /// Leader rank thresholds
    #[serde(default)]
    pub ranks: RankThresholds,
}

fn default_level_rates() -> Vec<u32> {
    vec![300, 100, 100, 100, 100, 100, 50, 50, 50, 50]
}

fn default_upline_levels() -> u32 {
    30
}

fn default_cap_multiplier() -> u32 {
    4
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            allocation: Allocation::default(),
            level_rates_bps: default_level_rates(),
            upline_levels: default_upline_levels(),
            cap_multiplier: default_cap_multiplier(),
            remainder_sink: RemainderSink::default(),
            help_pool_weighting: HelpPoolWeighting::default(),
            kyc_required: false,
            withdrawal: WithdrawalConfig::default(),
            pools: PoolSchedule::default(),
            ranks: RankThresholds::default(),
        }
    }
}

impl CompensationConfig {
    /// Check split totality and tier ordering
    pub fn validate(&self) -> Result<()> {
        if !self.allocation.is_complete() {
            return Err(CompensationError::InvalidConfig(format!(
                "allocation sums to {} bps, expected {}",
                self.allocation.total_bps(),
                BPS_DENOMINATOR
            )));
        }

        let level_sum: u128 = self.level_rates_bps.iter().map(|r| *r as u128).sum();
        if level_sum != self.allocation.level_bps as u128 {
            return Err(CompensationError::InvalidConfig(format!(
                "level rates sum to {} bps, allocation reserves {}",
                level_sum, self.allocation.level_bps
            )));
        }

        if self.packages.is_empty() {
            return Err(CompensationError::InvalidConfig("no packages".into()));
        }
        for (i, package) in self.packages.iter().enumerate() {
            if package.tier as usize != i + 1 {
                return Err(CompensationError::InvalidConfig(format!(
                    "package tiers must be contiguous from 1, found {} at position {}",
                    package.tier,
                    i + 1
                )));
            }
            if package.price_usd == 0 {
                return Err(CompensationError::InvalidConfig(format!(
                    "package {} has zero price",
                    package.tier
                )));
            }
        }
        if !self.packages.windows(2).all(|w| w[0].price_usd < w[1].price_usd) {
            return Err(CompensationError::InvalidConfig(
                "package prices must be strictly increasing".into(),
            ));
        }

        if self.upline_levels == 0 || self.cap_multiplier == 0 {
            return Err(CompensationError::InvalidConfig(
                "upline_levels and cap_multiplier must be positive".into(),
            ));
        }

        self.withdrawal.validate()?;
        self.pools.validate()
    }

    /// Look up a package by tier
    pub fn package(&self, tier: u8) -> Result<Package> {
        self.packages
            .iter()
            .find(|p| p.tier == tier)
            .copied()
            .ok_or(CompensationError::InvalidPackageLevel(tier))
    }

    /// Highest tier on sale
    pub fn top_tier(&self) -> u8 {
        self.packages.last().map(|p| p.tier).unwrap_or(0)
    }

    /// Earnings cap granted for an investment
    pub fn cap_for(&self, invested: Amount) -> Amount {
        invested * self.cap_multiplier as u128
    }

    /// Deepest sponsor level any stream reaches
    pub fn max_depth(&self) -> usize {
        self.level_rates_bps.len().max(self.upline_levels as usize)
    }
}

/// Withdrawal rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// Minimum withdrawal in whole units
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal_usd: u64,

    /// Admin fee on the withdrawable portion
    #[serde(default = "default_admin_fee")]
    pub admin_fee_bps: u32,

    /// Platform-wide daily withdrawal limit in whole units (0 = unlimited)
    #[serde(default = "default_daily_limit")]
    pub daily_limit_usd: u64,

    /// Split of the reinvested portion
    #[serde(default)]
    pub reinvest_split: ReinvestSplit,
}

fn default_min_withdrawal() -> u64 {
    10
}

fn default_admin_fee() -> u32 {
    500
}

fn default_daily_limit() -> u64 {
    50_000
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min_withdrawal_usd: default_min_withdrawal(),
            admin_fee_bps: default_admin_fee(),
            daily_limit_usd: default_daily_limit(),
            reinvest_split: ReinvestSplit::default(),
        }
    }
}

impl WithdrawalConfig {
    pub fn min_withdrawal(&self) -> Amount {
        usd(self.min_withdrawal_usd)
    }

    pub fn daily_limit(&self) -> Amount {
        usd(self.daily_limit_usd)
    }

    fn validate(&self) -> Result<()> {
        if self.admin_fee_bps as u128 > BPS_DENOMINATOR {
            return Err(CompensationError::InvalidConfig(format!(
                "admin fee {} bps exceeds 100%",
                self.admin_fee_bps
            )));
        }
        let split = &self.reinvest_split;
        let total = split.level_bps as u128 + split.upline_bps as u128 + split.help_bps as u128;
        if total != BPS_DENOMINATOR {
            return Err(CompensationError::InvalidConfig(format!(
                "reinvest split sums to {} bps",
                total
            )));
        }
        Ok(())
    }
}

/// Split of reinvested withdrawal amounts across pools
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinvestSplit {
    pub level_bps: u32,
    pub upline_bps: u32,
    pub help_bps: u32,
}

impl Default for ReinvestSplit {
    fn default() -> Self {
        Self {
            level_bps: 4_000,
            upline_bps: 3_000,
            help_bps: 3_000,
        }
    }
}

/// Distribution interval per pool, in days
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSchedule {
    #[serde(default = "default_leader_interval")]
    pub leader_interval_days: u32,

    #[serde(default = "default_help_interval")]
    pub help_interval_days: u32,

    #[serde(default = "default_club_interval")]
    pub club_interval_days: u32,

    #[serde(default = "default_help_interval")]
    pub reinvest_interval_days: u32,

    /// Help pool recipients must have been active this recently (0 = no limit)
    #[serde(default = "default_help_active_window")]
    pub help_active_window_days: u32,

    /// Silver Star group's share of the leader pool; Shining Star gets the rest
    #[serde(default = "default_leader_silver_share")]
    pub leader_silver_share_bps: u32,
}

fn default_leader_interval() -> u32 {
    15
}

fn default_help_interval() -> u32 {
    7
}

fn default_club_interval() -> u32 {
    30
}

fn default_help_active_window() -> u32 {
    30
}

fn default_leader_silver_share() -> u32 {
    5_000
}

impl Default for PoolSchedule {
    fn default() -> Self {
        Self {
            leader_interval_days: default_leader_interval(),
            help_interval_days: default_help_interval(),
            club_interval_days: default_club_interval(),
            reinvest_interval_days: default_help_interval(),
            help_active_window_days: default_help_active_window(),
            leader_silver_share_bps: default_leader_silver_share(),
        }
    }
}

impl PoolSchedule {
    pub fn interval_days(&self, kind: PoolKind) -> u32 {
        match kind {
            PoolKind::LeaderBonus => self.leader_interval_days,
            PoolKind::GlobalHelp => self.help_interval_days,
            PoolKind::Club => self.club_interval_days,
            PoolKind::LevelReinvest | PoolKind::UplineReinvest => self.reinvest_interval_days,
        }
    }

    pub fn interval_secs(&self, kind: PoolKind) -> i64 {
        self.interval_days(kind) as i64 * SECONDS_PER_DAY
    }

    /// Activity window for help pool eligibility (None = everyone qualifies)
    pub fn help_active_window_secs(&self) -> Option<i64> {
        (self.help_active_window_days > 0)
            .then(|| self.help_active_window_days as i64 * SECONDS_PER_DAY)
    }

    fn validate(&self) -> Result<()> {
        for kind in PoolKind::ALL {
            if self.interval_days(kind) == 0 {
                return Err(CompensationError::InvalidConfig(format!(
                    "{} pool interval must be at least one day",
                    kind
                )));
            }
        }
        if self.leader_silver_share_bps as u128 > BPS_DENOMINATOR {
            return Err(CompensationError::InvalidConfig(format!(
                "leader silver share {} bps exceeds 100%",
                self.leader_silver_share_bps
            )));
        }
        Ok(())
    }
}

/// Leader rank qualification thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankThresholds {
    #[serde(default = "default_shining_directs")]
    pub shining_star_directs: u64,

    #[serde(default = "default_shining_team")]
    pub shining_star_team: u64,

    #[serde(default = "default_silver_team")]
    pub silver_star_team: u64,
}

fn default_shining_directs() -> u64 {
    10
}

fn default_shining_team() -> u64 {
    250
}

fn default_silver_team() -> u64 {
    500
}

impl Default for RankThresholds {
    fn default() -> Self {
        Self {
            shining_star_directs: default_shining_directs(),
            shining_star_team: default_shining_team(),
            silver_star_team: default_silver_team(),
        }
    }
}

impl RankThresholds {
    /// Rank earned by the given counters
    ///
    /// Silver Star needs team size only; Shining Star needs both directs
    /// and team size.
    pub fn rank_for(&self, direct_referrals: u64, team_size: u64) -> LeaderRank {
        if team_size >= self.silver_star_team {
            LeaderRank::SilverStar
        } else if direct_referrals >= self.shining_star_directs
            && team_size >= self.shining_star_team
        {
            LeaderRank::ShiningStar
        } else {
            LeaderRank::None
        }
    }
}
