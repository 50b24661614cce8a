//! # Pool Accounting
//!
//! Pools accumulate shares of payments and withdrawals and pay them out
//! periodically to weighted recipients.
//!
//! ## Distribution Cycle
//!
//! ```text
//!   NotDue ──(interval elapsed)──► snapshot recipients + budget
//!                                        │
//!                              ┌─────────▼─────────┐
//!                              │ batch [cursor..n) │◄──┐ one transaction
//!                              └─────────┬─────────┘   │ per batch
//!                                        ├─────────────┘
//!                                        ▼
//!                              Completed, last = started_at
//! ```
//!
//! | Pool | Recipients and weight | Interval |
//! |------|-----------------------|----------|
//! | Leader bonus | half per rank group, equal within a group | 15 days |
//! | Global help | active in the last 30 days; 1 or cap headroom | 7 days |
//! | Club | 1 per top-tier holder | 30 days |
//! | Level reinvest | direct referrals | 7 days |
//! | Upline reinvest | team size | 7 days |
//!
//! A budget share with nobody to receive it (an empty pool, or an empty
//! leader rank group) moves to the platform reserve when the cycle starts.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tierflow_core::{
    apply_bps, Amount, CompensationConfig, CompensationError, HelpPoolWeighting, LeaderRank,
    PoolKind, Result, Timestamp, UserId,
};
use tierflow_storage::{DistributionCycle, LedgerState, Transaction, User};

/// Add `delta` to a pool balance
pub fn accrue_pool(tx: &mut Transaction<'_>, kind: PoolKind, delta: Amount) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let pool = tx.pool_mut(kind)?;
    pool.balance += delta;
    pool.total_accrued += delta;
    Ok(())
}

/// Outcome of one `run_distribution` call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionStatus {
    /// Interval has not elapsed and nothing is in flight
    NotDue,
    /// A batch was paid, more remain
    InProgress,
    /// The cycle finished with this call
    Completed,
}

/// Progress report for one batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionProgress {
    pub kind: PoolKind,
    pub status: DistributionStatus,
    /// Earliest time the next cycle may start
    pub next_due_at: Option<Timestamp>,
    /// Recipients processed so far in the cycle
    pub cursor: usize,
    pub total_recipients: usize,
    /// Budget fixed at cycle start
    pub budget: Amount,
    /// Credited to users in this batch
    pub paid_in_batch: Amount,
    /// Truncated by caps and moved to the global help pool in this batch
    pub redirected_in_batch: Amount,
    /// Credited to users over the whole cycle
    pub paid_in_cycle: Amount,
    /// Moved to the reserve at cycle start for lack of recipients
    pub unclaimed_to_reserve: Amount,
    pub payouts: Vec<(UserId, Amount)>,
}

impl DistributionProgress {
    fn not_due(kind: PoolKind, next_due_at: Option<Timestamp>) -> Self {
        Self {
            kind,
            status: DistributionStatus::NotDue,
            next_due_at,
            cursor: 0,
            total_recipients: 0,
            budget: 0,
            paid_in_batch: 0,
            redirected_in_batch: 0,
            paid_in_cycle: 0,
            unclaimed_to_reserve: 0,
            payouts: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != DistributionStatus::InProgress
    }
}

/// Runs resumable, batched pool distributions
pub struct PoolAccountant {
    config: Arc<CompensationConfig>,
}

impl PoolAccountant {
    pub fn new(config: Arc<CompensationConfig>) -> Self {
        Self { config }
    }

    /// Pay the next batch of the current cycle, starting one if due
    pub fn run_distribution(
        &self,
        tx: &mut Transaction<'_>,
        kind: PoolKind,
        now: Timestamp,
        batch_size: usize,
    ) -> Result<DistributionProgress> {
        if batch_size == 0 {
            return Err(CompensationError::InvalidInput(
                "batch size must be positive".into(),
            ));
        }

        let pool = tx.pool(kind)?;
        if pool.cycle.is_none() {
            if !pool.is_due(now) {
                tracing::debug!(pool = %kind, now, "Distribution not due");
                return Ok(DistributionProgress::not_due(kind, pool.next_due_at()));
            }
            let budget = pool.balance;
            let (recipients, unclaimed) = self.plan_cycle(tx, kind, budget, now);
            tracing::info!(
                pool = %kind,
                budget,
                recipients = recipients.len(),
                unclaimed,
                "Starting distribution cycle"
            );
            let pool = tx.pool_mut(kind)?;
            pool.balance -= unclaimed;
            pool.cycle = Some(DistributionCycle {
                started_at: now,
                budget,
                recipients,
                unclaimed,
                cursor: 0,
                paid: 0,
            });
            tx.globals_mut().reserve_balance += unclaimed;
        }

        let (cursor, batch, budget, unclaimed, total_recipients) = {
            let cycle = self.cycle(tx, kind)?;
            let end = cycle.cursor.saturating_add(batch_size).min(cycle.recipients.len());
            (
                end,
                cycle.recipients[cycle.cursor..end].to_vec(),
                cycle.budget,
                cycle.unclaimed,
                cycle.recipients.len(),
            )
        };

        let mut paid: Amount = 0;
        let mut truncated: Amount = 0;
        let mut payouts = Vec::with_capacity(batch.len());
        for (user_id, share) in batch {
            let user = tx.user_mut(user_id)?;
            // Rows may have changed since the snapshot
            let credited = if user.is_payable() {
                user.credit_earnings(share)
            } else {
                0
            };
            paid += credited;
            truncated += share - credited;
            if credited > 0 {
                payouts.push((user_id, credited));
            }
        }

        // The help pool keeps its own truncated shares
        let redirected = if kind == PoolKind::GlobalHelp { 0 } else { truncated };

        let pool = tx.pool_mut(kind)?;
        pool.balance = pool.balance.checked_sub(paid + redirected).ok_or_else(|| {
            CompensationError::Storage(format!("pool {} balance below cycle payouts", kind))
        })?;
        pool.total_distributed += paid;
        let cycle = pool
            .cycle
            .as_mut()
            .ok_or_else(|| CompensationError::Storage(format!("pool {} lost its cycle", kind)))?;
        cycle.cursor = cursor;
        cycle.paid += paid;
        let paid_in_cycle = cycle.paid;

        let status = if cycle.is_finished() {
            pool.last_distribution_at = Some(cycle.started_at);
            pool.cycle = None;
            tracing::info!(pool = %kind, paid = paid_in_cycle, budget, "Distribution cycle completed");
            DistributionStatus::Completed
        } else {
            tracing::debug!(pool = %kind, cursor, total_recipients, "Distribution batch paid");
            DistributionStatus::InProgress
        };
        let next_due_at = pool.next_due_at();

        accrue_pool(tx, PoolKind::GlobalHelp, redirected)?;

        Ok(DistributionProgress {
            kind,
            status,
            next_due_at,
            cursor,
            total_recipients,
            budget,
            paid_in_batch: paid,
            redirected_in_batch: redirected,
            paid_in_cycle,
            unclaimed_to_reserve: unclaimed,
            payouts,
        })
    }

    /// Eligible (user, weight) pairs for a cycle starting at `now`
    pub fn eligible_recipients(
        &self,
        state: &LedgerState,
        kind: PoolKind,
        now: Timestamp,
    ) -> Vec<(UserId, u128)> {
        let active_cutoff = match kind {
            PoolKind::GlobalHelp => self
                .config
                .pools
                .help_active_window_secs()
                .map(|window| now.saturating_sub(window)),
            _ => None,
        };
        state
            .users()
            .filter(|u| u.is_payable() && !u.is_capped())
            .filter(|u| active_cutoff.map_or(true, |cutoff| u.active_since(cutoff)))
            .filter_map(|u| {
                let weight = self.weight(u, kind);
                (weight > 0).then_some((u.id, weight))
            })
            .collect()
    }

    /// Fix every recipient's share of `budget`
    ///
    /// Returns the (user, share) snapshot and the part of the budget that
    /// has no recipient. Integer division dust stays in the pool.
    fn plan_cycle(
        &self,
        state: &LedgerState,
        kind: PoolKind,
        budget: Amount,
        now: Timestamp,
    ) -> (Vec<(UserId, Amount)>, Amount) {
        let eligible = self.eligible_recipients(state, kind, now);
        let groups = if kind == PoolKind::LeaderBonus {
            let silver_budget = apply_bps(budget, self.config.pools.leader_silver_share_bps);
            let (silver, shining): (Vec<_>, Vec<_>) = eligible.into_iter().partition(|(id, _)| {
                state
                    .find_user(*id)
                    .is_some_and(|u| u.leader_rank == LeaderRank::SilverStar)
            });
            vec![(budget - silver_budget, shining), (silver_budget, silver)]
        } else {
            vec![(budget, eligible)]
        };

        let mut shares = Vec::new();
        let mut unclaimed = 0;
        for (group_budget, members) in groups {
            let total_weight: u128 = members.iter().map(|(_, w)| *w).sum();
            if total_weight == 0 {
                unclaimed += group_budget;
                continue;
            }
            shares.extend(members.into_iter().filter_map(|(id, weight)| {
                let share = group_budget * weight / total_weight;
                (share > 0).then_some((id, share))
            }));
        }
        shares.sort_unstable_by_key(|(id, _)| *id);
        (shares, unclaimed)
    }

    fn weight(&self, user: &User, kind: PoolKind) -> u128 {
        match kind {
            PoolKind::LeaderBonus => user.leader_rank.is_leader() as u128,
            PoolKind::GlobalHelp => match self.config.help_pool_weighting {
                HelpPoolWeighting::Equal => 1,
                HelpPoolWeighting::CapHeadroom => user.cap_room(),
            },
            PoolKind::Club => (user.package_level == self.config.top_tier()) as u128,
            PoolKind::LevelReinvest => user.direct_referral_count as u128,
            PoolKind::UplineReinvest => user.team_size as u128,
        }
    }

    fn cycle<'t>(&self, tx: &'t Transaction<'_>, kind: PoolKind) -> Result<&'t DistributionCycle> {
        tx.pool(kind)?
            .cycle
            .as_ref()
            .ok_or_else(|| CompensationError::Storage(format!("pool {} has no cycle", kind)))
    }
}
