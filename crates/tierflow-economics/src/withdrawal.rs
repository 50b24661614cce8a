//! # Withdrawals
//!
//! A withdrawal is split between a payout and a forced reinvestment. The
//! split depends on the withdrawal tier (see [`WithdrawalTier`]); the payout
//! carries an admin fee, the reinvestment is spread over three pools.
//!
//! ```text
//!   $100 (Builder tier)
//!     ├── $75 withdraw ──┬── $3.75 fee ──► treasury
//!     │                  └── $71.25 ─────► user
//!     └── $25 reinvest ──┬── $10.00 ─────► level reinvest pool
//!                        ├── $7.50 ──────► upline reinvest pool
//!                        └── $7.50 ──────► global help pool
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tierflow_core::{
    apply_bps, Amount, CompensationConfig, CompensationError, PoolKind, Result, Timestamp,
    UserId, WithdrawalTier, SECONDS_PER_DAY,
};
use tierflow_storage::Transaction;

use crate::pools::accrue_pool;

/// Pool split of the reinvested portion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinvestBreakdown {
    pub level: Amount,
    pub upline: Amount,
    pub help: Amount,
}

impl ReinvestBreakdown {
    pub fn total(&self) -> Amount {
        self.level + self.upline + self.help
    }
}

/// Result of a successful withdrawal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    pub user: UserId,
    pub requested: Amount,
    pub tier: WithdrawalTier,
    /// Part of the request leaving the platform (before fee)
    pub withdraw_portion: Amount,
    /// Admin fee credited to the treasury
    pub fee: Amount,
    /// Amount the payment rail must transfer to the user
    pub net_payout: Amount,
    pub reinvest_portion: Amount,
    pub reinvest: ReinvestBreakdown,
    /// Day index the withdrawal counted against
    pub day: i64,
}

/// Validates and splits withdrawals
pub struct WithdrawalProcessor {
    config: Arc<CompensationConfig>,
}

impl WithdrawalProcessor {
    pub fn new(config: Arc<CompensationConfig>) -> Self {
        Self { config }
    }

    pub fn withdraw(
        &self,
        tx: &mut Transaction<'_>,
        user_id: UserId,
        requested: Amount,
        now: Timestamp,
    ) -> Result<WithdrawalReceipt> {
        let rules = &self.config.withdrawal;

        if tx.globals().paused {
            return Err(CompensationError::Paused);
        }
        let user = tx.user(user_id)?;
        if user.blacklisted {
            return Err(CompensationError::Blacklisted(user.address));
        }
        if requested < rules.min_withdrawal() {
            return Err(CompensationError::BelowMinimumWithdrawal {
                minimum: rules.min_withdrawal(),
            });
        }
        if requested > user.withdrawable_balance {
            return Err(CompensationError::InsufficientBalance {
                requested,
                available: user.withdrawable_balance,
            });
        }
        let tier = WithdrawalTier::for_user(user.direct_referral_count, user.auto_compound);

        // A clock that moved back stays on the counter's day
        let globals = tx.globals();
        let day = now.div_euclid(SECONDS_PER_DAY).max(globals.withdrawal_day);
        let withdrawn_today = if globals.withdrawal_day == day {
            globals.withdrawn_today
        } else {
            0
        };
        let limit = globals.daily_withdrawal_limit;
        if limit > 0 && withdrawn_today + requested > limit {
            return Err(CompensationError::DailyLimitExceeded {
                limit,
                withdrawn: withdrawn_today,
            });
        }

        let withdraw_portion = requested * tier.withdraw_percent() as u128 / 100;
        let reinvest_portion = requested - withdraw_portion;
        let fee = apply_bps(withdraw_portion, rules.admin_fee_bps);
        let net_payout = withdraw_portion - fee;

        let split = &rules.reinvest_split;
        let level = apply_bps(reinvest_portion, split.level_bps);
        let upline = apply_bps(reinvest_portion, split.upline_bps);
        let reinvest = ReinvestBreakdown {
            level,
            upline,
            help: reinvest_portion - level - upline,
        };

        let user = tx.user_mut(user_id)?;
        user.withdrawable_balance -= requested;
        user.total_withdrawn += net_payout;
        user.touch(now);

        let globals = tx.globals_mut();
        globals.withdrawal_day = day;
        globals.withdrawn_today = withdrawn_today + requested;
        globals.treasury_balance += fee;
        globals.total_withdrawn += net_payout;

        accrue_pool(tx, PoolKind::LevelReinvest, reinvest.level)?;
        accrue_pool(tx, PoolKind::UplineReinvest, reinvest.upline)?;
        accrue_pool(tx, PoolKind::GlobalHelp, reinvest.help)?;

        tracing::info!(
            user = %user_id,
            requested,
            net_payout,
            fee,
            reinvested = reinvest_portion,
            tier = ?tier,
            "Withdrawal processed"
        );

        Ok(WithdrawalReceipt {
            user: user_id,
            requested,
            tier,
            withdraw_portion,
            fee,
            net_payout,
            reinvest_portion,
            reinvest,
            day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_core::{usd, Address, NodeId};
    use tierflow_storage::{Ledger, User};

    fn setup(balance: Amount, directs: u64) -> (Ledger, WithdrawalProcessor) {
        let config = CompensationConfig::default();
        let ledger = Ledger::in_memory(&config);
        ledger
            .transact(|tx| {
                let mut user = User::new(
                    UserId::new(1),
                    Address::from_label(b"withdrawer"),
                    None,
                    4,
                    usd(200),
                    usd(800),
                    NodeId::new(1),
                    0,
                );
                user.withdrawable_balance = balance;
                user.lifetime_earnings = balance;
                user.direct_referral_count = directs;
                tx.insert_user(user)
            })
            .unwrap();
        (ledger, WithdrawalProcessor::new(Arc::new(config)))
    }

    fn withdraw(ledger: &Ledger, p: &WithdrawalProcessor, amount: Amount, now: Timestamp) -> Result<WithdrawalReceipt> {
        ledger.transact(|tx| p.withdraw(tx, UserId::new(1), amount, now))
    }

    #[test]
    fn test_builder_tier_split() {
        let (ledger, p) = setup(usd(150), 5);
        let receipt = withdraw(&ledger, &p, usd(100), 0).unwrap();

        assert_eq!(receipt.tier, WithdrawalTier::Builder);
        assert_eq!(receipt.withdraw_portion, usd(75));
        assert_eq!(receipt.fee, 3_750_000);
        assert_eq!(receipt.net_payout, 71_250_000);
        assert_eq!(receipt.reinvest_portion, usd(25));
        assert_eq!(receipt.reinvest.level, usd(10));
        assert_eq!(receipt.reinvest.upline, 7_500_000);
        assert_eq!(receipt.reinvest.help, 7_500_000);

        ledger.read(|s| {
            let user = s.user(UserId::new(1)).unwrap();
            assert_eq!(user.withdrawable_balance, usd(50));
            assert_eq!(user.total_withdrawn, 71_250_000);
            assert_eq!(s.globals().treasury_balance, 3_750_000);
            assert_eq!(s.globals().withdrawn_today, usd(100));
            assert_eq!(s.pool(PoolKind::LevelReinvest).unwrap().balance, usd(10));
            assert_eq!(s.pool(PoolKind::UplineReinvest).unwrap().balance, 7_500_000);
            assert_eq!(s.pool(PoolKind::GlobalHelp).unwrap().balance, 7_500_000);
        });
    }

    #[test]
    fn test_auto_compound_reinvests_everything() {
        let (ledger, p) = setup(usd(50), 25);
        ledger
            .transact(|tx| {
                tx.user_mut(UserId::new(1))?.auto_compound = true;
                Ok(())
            })
            .unwrap();
        let receipt = withdraw(&ledger, &p, usd(20), 0).unwrap();
        assert_eq!(receipt.tier, WithdrawalTier::AutoCompound);
        assert_eq!(receipt.net_payout, 0);
        assert_eq!(receipt.fee, 0);
        assert_eq!(receipt.reinvest.total(), usd(20));
    }

    #[test]
    fn test_reinvest_dust_goes_to_help() {
        let (ledger, p) = setup(usd(50), 0);
        // Odd amounts leave truncation dust in the help share
        let receipt = withdraw(&ledger, &p, usd(10) + 1, 0).unwrap();
        assert_eq!(receipt.withdraw_portion + receipt.reinvest_portion, usd(10) + 1);
        assert_eq!(receipt.reinvest.total(), receipt.reinvest_portion);
        assert_eq!(receipt.reinvest.level, apply_bps(receipt.reinvest_portion, 4_000));
    }

    #[test]
    fn test_validation_errors() {
        let (ledger, p) = setup(usd(30), 0);
        assert_eq!(
            withdraw(&ledger, &p, usd(5), 0),
            Err(CompensationError::BelowMinimumWithdrawal { minimum: usd(10) })
        );
        assert_eq!(
            withdraw(&ledger, &p, usd(31), 0),
            Err(CompensationError::InsufficientBalance {
                requested: usd(31),
                available: usd(30)
            })
        );

        ledger
            .transact(|tx| {
                tx.globals_mut().paused = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(withdraw(&ledger, &p, usd(10), 0), Err(CompensationError::Paused));

        ledger
            .transact(|tx| {
                tx.globals_mut().paused = false;
                tx.user_mut(UserId::new(1))?.blacklisted = true;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            withdraw(&ledger, &p, usd(10), 0),
            Err(CompensationError::Blacklisted(_))
        ));
    }

    #[test]
    fn test_daily_limit_resets_next_day() {
        let (ledger, p) = setup(usd(500), 0);
        ledger
            .transact(|tx| {
                tx.globals_mut().daily_withdrawal_limit = usd(150);
                Ok(())
            })
            .unwrap();

        withdraw(&ledger, &p, usd(100), 10).unwrap();
        assert_eq!(
            withdraw(&ledger, &p, usd(60), 20),
            Err(CompensationError::DailyLimitExceeded {
                limit: usd(150),
                withdrawn: usd(100)
            })
        );
        withdraw(&ledger, &p, usd(50), 30).unwrap();

        let next_day = withdraw(&ledger, &p, usd(100), SECONDS_PER_DAY + 5).unwrap();
        assert_eq!(next_day.day, 1);
        assert_eq!(ledger.read(|s| s.globals().withdrawn_today), usd(100));
    }

    #[test]
    fn test_clock_going_back_keeps_daily_counter() {
        let (ledger, p) = setup(usd(500), 0);
        ledger
            .transact(|tx| {
                tx.globals_mut().daily_withdrawal_limit = usd(150);
                Ok(())
            })
            .unwrap();

        withdraw(&ledger, &p, usd(100), SECONDS_PER_DAY + 10).unwrap();
        assert_eq!(
            withdraw(&ledger, &p, usd(60), 10),
            Err(CompensationError::DailyLimitExceeded {
                limit: usd(150),
                withdrawn: usd(100)
            })
        );
        ledger.read(|s| {
            assert_eq!(s.globals().withdrawal_day, 1);
            assert_eq!(s.globals().withdrawn_today, usd(100));
        });
    }

    #[test]
    fn test_withdrawal_records_activity() {
        let (ledger, p) = setup(usd(100), 0);
        withdraw(&ledger, &p, usd(20), 9_000).unwrap();
        assert_eq!(
            ledger.read(|s| s.user(UserId::new(1)).unwrap().last_activity_at),
            9_000
        );
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let (ledger, p) = setup(usd(100_000), 0);
        ledger
            .transact(|tx| {
                tx.globals_mut().daily_withdrawal_limit = 0;
                Ok(())
            })
            .unwrap();
        assert!(withdraw(&ledger, &p, usd(90_000), 0).is_ok());
    }

    #[test]
    fn test_failed_withdrawal_changes_nothing() {
        let (ledger, p) = setup(usd(30), 0);
        let before = ledger.snapshot();
        assert!(withdraw(&ledger, &p, usd(40), 0).is_err());
        assert_eq!(ledger.snapshot(), before);
    }
}
