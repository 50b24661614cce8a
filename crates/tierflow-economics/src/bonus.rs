//! # Bonus Distribution
//!
//! Splits a package payment across the payer's upline and the shared pools.
//!
//! 1. **Direct** (40%): immediate sponsor
//! 2. **Level** (10%): sponsor levels 1-10 at 3/1/1/1/1/1/0.5/0.5/0.5/0.5%
//! 3. **Upline** (10%): equal shares for up to 30 ancestors
//! 4. **Leader** (10%): leader bonus pool
//! 5. **Help** (30%): global help pool
//!
//! Individual credits are capped at the recipient's remaining cap room; the
//! truncated part goes to the global help pool. Shares without an eligible
//! recipient, and all rounding dust, go to the configured remainder sink.
//! Every unit of the payment appears on exactly one receipt line.

use std::sync::Arc;

use tierflow_core::{
    apply_bps, Amount, CompensationConfig, CompensationError, PoolKind, RemainderSink, Result,
    UserId,
};
use tierflow_storage::Transaction;

use crate::pools::accrue_pool;
use crate::receipt::{CreditReason, DistributionReceipt, Recipient};

/// Computes and credits bonus streams for a payment
pub struct BonusDistributor {
    config: Arc<CompensationConfig>,
}

impl BonusDistributor {
    pub fn new(config: Arc<CompensationConfig>) -> Self {
        Self { config }
    }

    /// Distribute `amount` paid by `payer` for package `tier`
    pub fn distribute(
        &self,
        tx: &mut Transaction<'_>,
        payer: UserId,
        amount: Amount,
        tier: u8,
    ) -> Result<DistributionReceipt> {
        let config = &self.config;
        let allocation = &config.allocation;
        let ancestors = tx.ancestors(payer, config.max_depth())?;
        let mut receipt = DistributionReceipt::new(payer, amount, tier);

        let direct = apply_bps(amount, allocation.direct_bps);
        self.pay(tx, &mut receipt, ancestors.first().copied(), direct, CreditReason::Direct)?;

        // Level 1 is the direct sponsor again
        for (i, rate) in config.level_rates_bps.iter().enumerate() {
            let share = apply_bps(amount, *rate);
            let level = i as u32 + 1;
            self.pay(tx, &mut receipt, ancestors.get(i).copied(), share, CreditReason::Level(level))?;
        }

        let levels = config.upline_levels as usize;
        let per_ancestor = apply_bps(amount, allocation.upline_bps) / levels as u128;
        for i in 0..levels {
            let position = i as u32 + 1;
            self.pay(
                tx,
                &mut receipt,
                ancestors.get(i).copied(),
                per_ancestor,
                CreditReason::Upline(position),
            )?;
        }

        let leader = apply_bps(amount, allocation.leader_bps);
        accrue_pool(tx, PoolKind::LeaderBonus, leader)?;
        receipt.push(Recipient::Pool(PoolKind::LeaderBonus), leader, CreditReason::LeaderShare);

        let help = apply_bps(amount, allocation.help_bps);
        accrue_pool(tx, PoolKind::GlobalHelp, help)?;
        receipt.push(Recipient::Pool(PoolKind::GlobalHelp), help, CreditReason::HelpShare);

        let remainder = amount.checked_sub(receipt.total_credited()).ok_or_else(|| {
            CompensationError::InvalidConfig("allocation exceeds the payment".into())
        })?;
        self.route_remainder(tx, &mut receipt, remainder)?;

        debug_assert_eq!(receipt.total_credited(), amount);
        tracing::debug!(
            payer = %payer,
            amount,
            tier,
            individual = receipt.individual_total(),
            unallocated = remainder,
            "Distributed payment"
        );
        Ok(receipt)
    }

    /// Credit one share to a user, capped, with overflow to the help pool
    ///
    /// A missing or non-payable recipient leaves the share uncredited; it is
    /// picked up by the remainder line.
    fn pay(
        &self,
        tx: &mut Transaction<'_>,
        receipt: &mut DistributionReceipt,
        recipient: Option<UserId>,
        share: Amount,
        reason: CreditReason,
    ) -> Result<()> {
        let Some(id) = recipient else {
            return Ok(());
        };
        if share == 0 {
            return Ok(());
        }
        let user = tx.user_mut(id)?;
        if !user.is_payable() {
            return Ok(());
        }

        let credited = user.credit_earnings(share);
        receipt.push(Recipient::User(id), credited, reason);

        let overflow = share - credited;
        if overflow > 0 {
            tracing::debug!(user = %id, overflow, "Earnings cap reached, redirecting");
            accrue_pool(tx, PoolKind::GlobalHelp, overflow)?;
            receipt.push(
                Recipient::Pool(PoolKind::GlobalHelp),
                overflow,
                CreditReason::CapOverflow { from: id },
            );
        }
        Ok(())
    }

    fn route_remainder(
        &self,
        tx: &mut Transaction<'_>,
        receipt: &mut DistributionReceipt,
        remainder: Amount,
    ) -> Result<()> {
        if remainder == 0 {
            return Ok(());
        }
        match self.config.remainder_sink {
            RemainderSink::GlobalHelpPool => {
                accrue_pool(tx, PoolKind::GlobalHelp, remainder)?;
                receipt.push(
                    Recipient::Pool(PoolKind::GlobalHelp),
                    remainder,
                    CreditReason::Unallocated,
                );
            }
            RemainderSink::Reserve => {
                tx.globals_mut().reserve_balance += remainder;
                receipt.push(Recipient::Reserve, remainder, CreditReason::Unallocated);
            }
        }
        Ok(())
    }
}
