//! # Compensation Engine
//!
//! Orchestrates registrations, upgrades, withdrawals, admin switches and
//! pool distribution jobs on top of one [`Ledger`].
//!
//! ## Call Shape
//!
//! ```text
//!   register ──► pricing (async, timeout) ──► KYC (async, timeout)
//!                                                │
//!                              ┌─────────────────▼──────────────────┐
//!                              │ ledger transaction (serialized)    │
//!                              │  checks → placement → user row     │
//!                              │  → bonus distribution → counters   │
//!                              └────────────────────────────────────┘
//! ```
//!
//! External I/O always finishes before the ledger lock is taken, and every
//! state-changing call is one transaction: it applies completely or not at all.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tierflow_core::{
    Address, Amount, CompensationConfig, CompensationError, Payment, PoolKind, Result,
    Timestamp, UserId,
};
use tierflow_economics::{
    accrue_pool, BonusDistributor, DistributionProgress, DistributionReceipt, Placement,
    PlacementEngine, PoolAccountant, WithdrawalProcessor, WithdrawalReceipt,
};
use tierflow_storage::{Ledger, Transaction, User};

use crate::config::NodeConfig;
use crate::kyc::{KycGate, KycProvider};
use crate::pricing::{PriceOracle, PricingAdapter};
use crate::read_model::{GlobalStats, PoolSnapshot, UserSnapshot};

/// Outcome of a registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub user: UserId,
    pub placement: Placement,
    pub receipt: DistributionReceipt,
}

/// Outcome of a package upgrade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrade {
    pub user: UserId,
    pub from_tier: u8,
    pub to_tier: u8,
    /// Price difference that was paid and distributed
    pub differential: Amount,
    pub receipt: DistributionReceipt,
}

/// Outcome of a multi-batch distribution run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRun {
    /// Batches committed by this run
    pub batches: usize,
    /// Progress reported by the last batch
    pub last: DistributionProgress,
    /// Total credited to users by this run
    pub paid: Amount,
    pub cancelled: bool,
}

/// The compensation service
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct CompensationEngine {
    config: Arc<CompensationConfig>,
    ledger: Ledger,
    placement: PlacementEngine,
    bonus: BonusDistributor,
    pools: PoolAccountant,
    withdrawals: WithdrawalProcessor,
    pricing: PricingAdapter,
    kyc: KycGate,
    batch_size: usize,
}

impl CompensationEngine {
    /// Build an engine over an existing ledger
    pub fn new(
        node_config: &NodeConfig,
        ledger: Ledger,
        oracle: Arc<dyn PriceOracle>,
        kyc_provider: Arc<dyn KycProvider>,
    ) -> Result<Self> {
        node_config.validate()?;
        let config = Arc::new(node_config.compensation.clone());

        Ok(Self {
            placement: PlacementEngine::new(config.ranks.clone()),
            bonus: BonusDistributor::new(config.clone()),
            pools: PoolAccountant::new(config.clone()),
            withdrawals: WithdrawalProcessor::new(config.clone()),
            pricing: PricingAdapter::new(oracle, node_config.pricing.clone()),
            kyc: KycGate::new(kyc_provider, node_config.kyc.timeout()),
            batch_size: node_config.distribution.batch_size,
            config,
            ledger,
        })
    }

    /// Open the file-backed ledger in the configured data directory
    pub fn open(
        node_config: &NodeConfig,
        oracle: Arc<dyn PriceOracle>,
        kyc_provider: Arc<dyn KycProvider>,
    ) -> Result<Self> {
        let ledger = Ledger::open(node_config.data_dir(), &node_config.compensation)?;
        Self::new(node_config, ledger, oracle, kyc_provider)
    }

    /// Engine over a volatile ledger
    pub fn in_memory(
        node_config: &NodeConfig,
        oracle: Arc<dyn PriceOracle>,
        kyc_provider: Arc<dyn KycProvider>,
    ) -> Result<Self> {
        let ledger = Ledger::in_memory(&node_config.compensation);
        Self::new(node_config, ledger, oracle, kyc_provider)
    }

    pub fn config(&self) -> &CompensationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // === User operations ===

    /// Register `address` under `sponsor` with package `tier`
    ///
    /// `sponsor` may be `None` only for the very first user.
    pub async fn register(
        &self,
        address: Address,
        sponsor: Option<Address>,
        tier: u8,
        payment: Payment,
        now: Timestamp,
    ) -> Result<Registration> {
        let package = self.config.package(tier)?;
        let price = package.price();

        let (paused, registered, kyc_required) = self.ledger.read(|s| {
            (
                s.globals().paused,
                s.user_id_of(&address).is_some(),
                s.globals().kyc_required,
            )
        });
        if paused {
            return Err(CompensationError::Paused);
        }
        if registered {
            return Err(CompensationError::AlreadyRegistered(address));
        }

        self.pricing.verify_payment(&payment, price, now).await?;
        let kyc_verified = if kyc_required {
            self.kyc.check(&address).await?;
            true
        } else {
            false
        };

        let registration = self.ledger.transact(|tx| {
            ensure_running(tx)?;
            if tx.globals().kyc_required && !kyc_verified {
                return Err(CompensationError::KycRequired(address));
            }
            if tx.user_id_of(&address).is_some() {
                return Err(CompensationError::AlreadyRegistered(address));
            }
            let sponsor_id = match sponsor {
                Some(sponsor) => Some(tx.user_id_of(&sponsor).ok_or_else(|| {
                    CompensationError::InvalidSponsor(format!("{} is not registered", sponsor))
                })?),
                None => None,
            };

            let id = tx.next_user_id();
            let placement = self.placement.place(tx, id, sponsor_id)?;

            let mut user = User::new(
                id,
                address,
                sponsor_id,
                tier,
                price,
                self.config.cap_for(price),
                placement.node,
                now,
            );
            user.kyc_verified = kyc_verified;
            tx.insert_user(user)?;

            let globals = tx.globals_mut();
            globals.total_users += 1;
            globals.total_volume += price;

            let receipt = self.bonus.distribute(tx, id, price, tier)?;
            Ok(Registration {
                user: id,
                placement,
                receipt,
            })
        })?;

        tracing::info!(
            user = %registration.user,
            address = %address,
            tier,
            price,
            depth = registration.placement.depth,
            "User registered"
        );
        Ok(registration)
    }

    /// Register `address` under the holder of `referral_code`
    pub async fn register_with_referral_code(
        &self,
        address: Address,
        referral_code: &str,
        tier: u8,
        payment: Payment,
        now: Timestamp,
    ) -> Result<Registration> {
        let sponsor = self.sponsor_for_code(referral_code)?;
        self.register(address, Some(sponsor), tier, payment, now).await
    }

    /// Address holding `referral_code`
    pub fn sponsor_for_code(&self, referral_code: &str) -> Result<Address> {
        self.ledger.read(|s| {
            s.user_id_by_referral_code(referral_code)
                .and_then(|id| s.find_user(id))
                .map(|u| u.address)
                .ok_or_else(|| {
                    CompensationError::InvalidSponsor(format!(
                        "unknown referral code {}",
                        referral_code
                    ))
                })
        })
    }

    /// Move `address` to a strictly higher package, paying the difference
    pub async fn upgrade(
        &self,
        address: Address,
        new_tier: u8,
        payment: Payment,
        now: Timestamp,
    ) -> Result<Upgrade> {
        let target = self.config.package(new_tier)?;
        let (current_tier, kyc_required) = self.ledger.read(|s| {
            s.user_by_address(&address)
                .map(|u| (u.package_level, s.globals().kyc_required))
        })?;
        let current = self.config.package(current_tier)?;
        if new_tier <= current_tier {
            return Err(CompensationError::InvalidPackageLevel(new_tier));
        }
        let differential = target.price() - current.price();

        self.pricing.verify_payment(&payment, differential, now).await?;
        let kyc_verified = if kyc_required {
            self.kyc.check(&address).await?;
            true
        } else {
            false
        };

        let upgrade = self.ledger.transact(|tx| {
            ensure_running(tx)?;
            if tx.globals().kyc_required && !kyc_verified {
                return Err(CompensationError::KycRequired(address));
            }
            let user = tx.user_by_address(&address)?;
            let id = user.id;
            if user.blacklisted {
                return Err(CompensationError::Blacklisted(address));
            }
            // A concurrent upgrade changed the base price
            if user.package_level != current_tier {
                return Err(CompensationError::InvalidPackageLevel(new_tier));
            }

            let extra_cap = self.config.cap_for(differential);
            let user = tx.user_mut(id)?;
            user.package_level = new_tier;
            user.total_invested += differential;
            user.earnings_cap += extra_cap;
            user.touch(now);
            if kyc_verified {
                user.kyc_verified = true;
            }
            tx.globals_mut().total_volume += differential;

            let receipt = self.bonus.distribute(tx, id, differential, new_tier)?;
            Ok(Upgrade {
                user: id,
                from_tier: current_tier,
                to_tier: new_tier,
                differential,
                receipt,
            })
        })?;

        tracing::info!(
            user = %upgrade.user,
            from = current_tier,
            to = new_tier,
            differential,
            "Package upgraded"
        );
        Ok(upgrade)
    }

    /// Withdraw `amount` from the user's withdrawable balance
    pub fn withdraw(&self, address: Address, amount: Amount, now: Timestamp) -> Result<WithdrawalReceipt> {
        self.ledger.transact(|tx| {
            let id = tx.user_by_address(&address)?.id;
            self.withdrawals.withdraw(tx, id, amount, now)
        })
    }

    /// Opt in or out of reinvesting every withdrawal
    pub fn set_auto_compound(&self, address: Address, enabled: bool) -> Result<()> {
        self.ledger.transact(|tx| {
            let id = tx.user_by_address(&address)?.id;
            tx.user_mut(id)?.auto_compound = enabled;
            Ok(())
        })?;
        tracing::info!(address = %address, enabled, "Auto-compound updated");
        Ok(())
    }

    // === Admin operations ===

    pub fn set_paused(&self, paused: bool) -> Result<()> {
        self.ledger.transact(|tx| {
            tx.globals_mut().paused = paused;
            Ok(())
        })?;
        tracing::warn!(paused, "Platform pause switched");
        Ok(())
    }

    pub fn set_kyc_required(&self, required: bool) -> Result<()> {
        self.ledger.transact(|tx| {
            tx.globals_mut().kyc_required = required;
            Ok(())
        })?;
        tracing::info!(required, "KYC requirement switched");
        Ok(())
    }

    /// Set the platform-wide daily withdrawal limit (0 disables it)
    pub fn set_daily_withdrawal_limit(&self, limit: Amount) -> Result<()> {
        self.ledger.transact(|tx| {
            tx.globals_mut().daily_withdrawal_limit = limit;
            Ok(())
        })?;
        tracing::info!(limit, "Daily withdrawal limit updated");
        Ok(())
    }

    pub fn set_blacklisted(&self, address: Address, blacklisted: bool) -> Result<()> {
        self.ledger.transact(|tx| {
            let id = tx.user_by_address(&address)?.id;
            tx.user_mut(id)?.blacklisted = blacklisted;
            Ok(())
        })?;
        tracing::warn!(address = %address, blacklisted, "Blacklist updated");
        Ok(())
    }

    /// Top up a pool from outside the payment flow
    pub fn fund_pool(&self, kind: PoolKind, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(CompensationError::InvalidInput("funding amount must be positive".into()));
        }
        self.ledger.transact(|tx| accrue_pool(tx, kind, amount))?;
        tracing::info!(pool = %kind, amount, "Pool funded");
        Ok(())
    }

    // === Distribution jobs ===

    /// Run one batch of `kind`'s distribution
    pub fn run_distribution(&self, kind: PoolKind, now: Timestamp, batch_size: usize) -> Result<DistributionProgress> {
        self.ledger
            .transact(|tx| self.pools.run_distribution(tx, kind, now, batch_size))
    }

    /// Run batches until the cycle completes, is not due, or `cancel` is set
    ///
    /// Each batch commits on its own; a cancelled run resumes from the
    /// persisted cursor on the next call.
    pub async fn run_distribution_to_completion(
        &self,
        kind: PoolKind,
        now: Timestamp,
        cancel: Arc<AtomicBool>,
    ) -> Result<DistributionRun> {
        let mut batches = 0;
        let mut paid = 0;
        loop {
            let progress = self.run_distribution(kind, now, self.batch_size)?;
            paid += progress.paid_in_batch;
            if progress.status != tierflow_economics::DistributionStatus::NotDue {
                batches += 1;
            }
            if progress.is_finished() {
                return Ok(DistributionRun {
                    batches,
                    last: progress,
                    paid,
                    cancelled: false,
                });
            }
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(pool = %kind, cursor = progress.cursor, "Distribution cancelled between batches");
                return Ok(DistributionRun {
                    batches,
                    last: progress,
                    paid,
                    cancelled: true,
                });
            }
            tokio::task::yield_now().await;
        }
    }

    /// Drive every pool that is due (or in flight) to completion
    pub async fn run_due_distributions(&self, now: Timestamp) -> Result<Vec<DistributionRun>> {
        let never = Arc::new(AtomicBool::new(false));
        let mut runs = Vec::with_capacity(PoolKind::ALL.len());
        for kind in PoolKind::ALL {
            runs.push(self.run_distribution_to_completion(kind, now, never.clone()).await?);
        }
        Ok(runs)
    }

    // === Read model ===

    pub fn user_snapshot(&self, address: &Address) -> Result<UserSnapshot> {
        self.ledger.read(|s| {
            let user = s.user_by_address(address)?;
            UserSnapshot::build(s, user)
        })
    }

    pub fn pool_snapshots(&self) -> Vec<PoolSnapshot> {
        self.ledger.read(|s| s.pools().map(PoolSnapshot::from).collect())
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.ledger.read(GlobalStats::build)
    }
}

fn ensure_running(tx: &Transaction<'_>) -> Result<()> {
    if tx.globals().paused {
        return Err(CompensationError::Paused);
    }
    Ok(())
}
