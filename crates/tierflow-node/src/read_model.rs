//! Read-model consumed by dashboards
//!
//! Plain serializable views built from a consistent ledger snapshot.
//! Addresses are rendered as `0x` hex strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tierflow_core::{
    Amount, LeaderRank, NodeId, PoolKind, Result, Timestamp, UserId, WithdrawalTier,
};
use tierflow_storage::{LedgerState, Pool, User};

/// Where a user sits in the binary matrix
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixPosition {
    pub node: NodeId,
    /// Distance from the matrix root
    pub depth: u32,
    /// Owner of the parent node
    pub parent: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
}

/// Per-user dashboard view
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub address: String,
    pub referral_code: String,
    pub sponsor: Option<String>,
    pub package_level: u8,
    pub total_invested: Amount,
    pub earnings_cap: Amount,
    pub lifetime_earnings: Amount,
    pub cap_room: Amount,
    pub withdrawable_balance: Amount,
    pub total_withdrawn: Amount,
    pub direct_referral_count: u64,
    pub team_size: u64,
    pub leader_rank: LeaderRank,
    pub withdrawal_tier: WithdrawalTier,
    pub auto_compound: bool,
    pub blacklisted: bool,
    pub kyc_verified: bool,
    pub registered_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub matrix: MatrixPosition,
}

impl UserSnapshot {
    pub fn build(state: &LedgerState, user: &User) -> Result<Self> {
        let node = state.node(user.matrix_node)?;
        let owner_of = |id: Option<NodeId>| -> Result<Option<String>> {
            match id {
                Some(id) => {
                    let owner = state.user(state.node(id)?.owner)?;
                    Ok(Some(owner.address.to_string()))
                }
                None => Ok(None),
            }
        };
        let sponsor = match user.sponsor {
            Some(id) => Some(state.user(id)?.address.to_string()),
            None => None,
        };

        Ok(Self {
            id: user.id,
            address: user.address.to_string(),
            referral_code: user.referral_code.clone(),
            sponsor,
            package_level: user.package_level,
            total_invested: user.total_invested,
            earnings_cap: user.earnings_cap,
            lifetime_earnings: user.lifetime_earnings,
            cap_room: user.cap_room(),
            withdrawable_balance: user.withdrawable_balance,
            total_withdrawn: user.total_withdrawn,
            direct_referral_count: user.direct_referral_count,
            team_size: user.team_size,
            leader_rank: user.leader_rank,
            withdrawal_tier: WithdrawalTier::for_user(user.direct_referral_count, user.auto_compound),
            auto_compound: user.auto_compound,
            blacklisted: user.blacklisted,
            kyc_verified: user.kyc_verified,
            registered_at: to_datetime(user.registered_at),
            last_activity_at: to_datetime(user.last_activity_at),
            matrix: MatrixPosition {
                node: node.id,
                depth: node.depth,
                parent: owner_of(node.parent)?,
                left: owner_of(node.left)?,
                right: owner_of(node.right)?,
            },
        })
    }
}

/// Per-pool dashboard view
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub kind: PoolKind,
    pub balance: Amount,
    pub last_distribution_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    /// A cycle is in flight
    pub distributing: bool,
    /// Cursor and size of the in-flight cycle
    pub progress: Option<(usize, usize)>,
    pub total_accrued: Amount,
    pub total_distributed: Amount,
}

impl From<&Pool> for PoolSnapshot {
    fn from(pool: &Pool) -> Self {
        Self {
            kind: pool.kind,
            balance: pool.balance,
            last_distribution_at: pool.last_distribution_at.and_then(to_datetime),
            next_due_at: pool.next_due_at().and_then(to_datetime),
            distributing: pool.cycle.is_some(),
            progress: pool.cycle.as_ref().map(|c| (c.cursor, c.recipients.len())),
            total_accrued: pool.total_accrued,
            total_distributed: pool.total_distributed,
        }
    }
}

/// Platform-wide figures
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_users: u64,
    pub total_volume: Amount,
    pub total_withdrawn: Amount,
    /// Sum of all pool balances
    pub pooled: Amount,
    pub treasury_balance: Amount,
    pub reserve_balance: Amount,
    /// Sum of all users' withdrawable balances
    pub outstanding_balances: Amount,
    pub paused: bool,
    pub kyc_required: bool,
    pub daily_withdrawal_limit: Amount,
    pub withdrawn_today: Amount,
}

impl GlobalStats {
    pub fn build(state: &LedgerState) -> Self {
        let globals = state.globals();
        Self {
            total_users: globals.total_users,
            total_volume: globals.total_volume,
            total_withdrawn: globals.total_withdrawn,
            pooled: state.pools().map(|p| p.balance).sum(),
            treasury_balance: globals.treasury_balance,
            reserve_balance: globals.reserve_balance,
            outstanding_balances: state.users().map(|u| u.withdrawable_balance).sum(),
            paused: globals.paused,
            kyc_required: globals.kyc_required,
            daily_withdrawal_limit: globals.daily_withdrawal_limit,
            withdrawn_today: globals.withdrawn_today,
        }
    }
}

fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}
