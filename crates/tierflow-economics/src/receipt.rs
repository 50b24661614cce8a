//! Audit receipts for payment distributions

use serde::{Deserialize, Serialize};
use tierflow_core::{Amount, PoolKind, UserId};

/// Who received a credit line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    User(UserId),
    Pool(PoolKind),
    /// Platform reserve, outside the pools
    Reserve,
}

/// Why a credit line exists
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditReason {
    Direct,
    /// Level bonus, 1-based level
    Level(u32),
    /// Global upline bonus, 1-based ancestor position
    Upline(u32),
    LeaderShare,
    HelpShare,
    /// Shares with no eligible recipient, plus rounding dust
    Unallocated,
    /// Portion truncated by a recipient's earnings cap
    CapOverflow { from: UserId },
}

/// One credit line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub recipient: Recipient,
    pub amount: Amount,
    pub reason: CreditReason,
}

/// Exact breakdown of one payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReceipt {
    pub payer: UserId,
    pub amount: Amount,
    pub tier: u8,
    pub credits: Vec<Credit>,
}

impl DistributionReceipt {
    pub fn new(payer: UserId, amount: Amount, tier: u8) -> Self {
        Self {
            payer,
            amount,
            tier,
            credits: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, recipient: Recipient, amount: Amount, reason: CreditReason) {
        if amount > 0 {
            self.credits.push(Credit {
                recipient,
                amount,
                reason,
            });
        }
    }

    /// Sum of every credit line; equals `amount` for a conserving split
    pub fn total_credited(&self) -> Amount {
        self.credits.iter().map(|c| c.amount).sum()
    }

    pub fn user_total(&self, user: UserId) -> Amount {
        self.sum_where(|c| c.recipient == Recipient::User(user))
    }

    pub fn pool_total(&self, kind: PoolKind) -> Amount {
        self.sum_where(|c| c.recipient == Recipient::Pool(kind))
    }

    pub fn reserve_total(&self) -> Amount {
        self.sum_where(|c| c.recipient == Recipient::Reserve)
    }

    /// Total credited to individuals
    pub fn individual_total(&self) -> Amount {
        self.sum_where(|c| matches!(c.recipient, Recipient::User(_)))
    }

    pub fn amount_for(&self, reason: CreditReason) -> Amount {
        self.sum_where(|c| c.reason == reason)
    }

    /// Total truncated by earnings caps
    pub fn cap_overflow_total(&self) -> Amount {
        self.sum_where(|c| matches!(c.reason, CreditReason::CapOverflow { .. }))
    }

    fn sum_where(&self, pred: impl Fn(&Credit) -> bool) -> Amount {
        self.credits.iter().filter(|c| pred(c)).map(|c| c.amount).sum()
    }
}
