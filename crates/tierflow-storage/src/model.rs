//! Ledger rows: users, matrix nodes, pools and the global state row

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use tierflow_core::{
    Address, Amount, CompensationConfig, CompensationError, LeaderRank, NodeId, PoolKind,
    Result, Timestamp, UserId,
};

/// A registered participant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Arena id
    pub id: UserId,

    /// External address
    pub address: Address,

    /// Upline reference, set once at registration (None only for the root)
    pub sponsor: Option<UserId>,

    /// Current package tier
    pub package_level: u8,

    /// Sum of all package payments
    pub total_invested: Amount,

    /// Maximum lifetime earnings
    pub earnings_cap: Amount,

    /// Everything ever credited (bonuses and pool payouts)
    pub lifetime_earnings: Amount,

    /// Credited but not yet withdrawn
    pub withdrawable_balance: Amount,

    /// Net amount paid out on withdrawals
    pub total_withdrawn: Amount,

    /// Users sponsored directly
    pub direct_referral_count: u64,

    /// Users anywhere below in the sponsor tree
    pub team_size: u64,

    /// Position in the binary matrix
    pub matrix_node: NodeId,

    /// Leader rank (never decreases)
    pub leader_rank: LeaderRank,

    /// Reinvest everything on withdrawal
    pub auto_compound: bool,

    /// Account is active
    pub active: bool,

    /// Account is blacklisted by governance
    pub blacklisted: bool,

    /// Last KYC verdict
    pub kyc_verified: bool,

    /// Registration timestamp
    pub registered_at: Timestamp,

    /// Last registration, upgrade or withdrawal
    pub last_activity_at: Timestamp,

    /// Code other users can register under
    pub referral_code: String,
}

impl User {
    /// Create a freshly registered user
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: UserId,
        address: Address,
        sponsor: Option<UserId>,
        package_level: u8,
        invested: Amount,
        earnings_cap: Amount,
        matrix_node: NodeId,
        registered_at: Timestamp,
    ) -> Self {
        Self {
            id,
            address,
            sponsor,
            package_level,
            total_invested: invested,
            earnings_cap,
            lifetime_earnings: 0,
            withdrawable_balance: 0,
            total_withdrawn: 0,
            direct_referral_count: 0,
            team_size: 0,
            matrix_node,
            leader_rank: LeaderRank::None,
            auto_compound: false,
            active: true,
            blacklisted: false,
            kyc_verified: false,
            registered_at,
            last_activity_at: registered_at,
            referral_code: address.referral_code(),
        }
    }

    /// Record account activity at `now` (never moves backwards)
    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity_at = self.last_activity_at.max(now);
    }

    /// Active at or after `cutoff`
    pub fn active_since(&self, cutoff: Timestamp) -> bool {
        self.last_activity_at >= cutoff
    }

    /// Remaining earnings before the cap is hit
    pub fn cap_room(&self) -> Amount {
        self.earnings_cap.saturating_sub(self.lifetime_earnings)
    }

    pub fn is_capped(&self) -> bool {
        self.cap_room() == 0
    }

    /// Can receive credits at all
    pub fn is_payable(&self) -> bool {
        self.active && !self.blacklisted
    }

    /// Credit up to the remaining cap room, returning the amount credited
    pub fn credit_earnings(&mut self, amount: Amount) -> Amount {
        let credited = amount.min(self.cap_room());
        self.lifetime_earnings += credited;
        self.withdrawable_balance += credited;
        credited
    }
}

/// Side of a binary matrix slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// A node in the binary placement matrix
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixNode {
    pub id: NodeId,
    pub owner: UserId,
    pub parent: Option<NodeId>,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    /// Distance from the matrix root
    pub depth: u32,
}

impl MatrixNode {
    pub fn new(id: NodeId, owner: UserId, parent: Option<NodeId>, depth: u32) -> Self {
        Self {
            id,
            owner,
            parent,
            left: None,
            right: None,
            depth,
        }
    }

    pub fn child_count(&self) -> usize {
        self.left.is_some() as usize + self.right.is_some() as usize
    }

    /// First free slot, left before right
    pub fn free_slot(&self) -> Option<Side> {
        if self.left.is_none() {
            Some(Side::Left)
        } else if self.right.is_none() {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> {
        self.left.into_iter().chain(self.right)
    }

    /// Attach a child into an empty slot
    pub fn attach(&mut self, side: Side, child: NodeId) -> Result<()> {
        let slot = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        if slot.is_some() {
            return Err(CompensationError::Storage(format!(
                "matrix slot {:?} of {} already taken",
                side, self.id
            )));
        }
        *slot = Some(child);
        Ok(())
    }
}

/// An in-flight pool distribution
///
/// The recipient set, their shares and the budget are fixed when the cycle
/// starts; the cursor advances one batch per transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionCycle {
    pub started_at: Timestamp,
    /// Pool balance when the cycle started
    pub budget: Amount,
    /// Snapshot of (recipient, share)
    pub recipients: Vec<(UserId, Amount)>,
    /// Moved to the reserve at cycle start for lack of recipients
    pub unclaimed: Amount,
    /// Next recipient index
    pub cursor: usize,
    /// Paid out so far
    pub paid: Amount,
}

impl DistributionCycle {
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.recipients.len()
    }
}

/// A shared pool row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub kind: PoolKind,
    pub balance: Amount,
    pub last_distribution_at: Option<Timestamp>,
    pub interval_secs: i64,
    pub cycle: Option<DistributionCycle>,
    pub total_accrued: Amount,
    pub total_distributed: Amount,
}

impl Pool {
    pub fn new(kind: PoolKind, interval_secs: i64) -> Self {
        Self {
            kind,
            balance: 0,
            last_distribution_at: None,
            interval_secs,
            cycle: None,
            total_accrued: 0,
            total_distributed: 0,
        }
    }

    /// When the next cycle may start (None = immediately)
    pub fn next_due_at(&self) -> Option<Timestamp> {
        self.last_distribution_at.map(|t| t + self.interval_secs)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_due_at().map_or(true, |due| now >= due)
    }

    /// Distribution cursor of the in-flight cycle
    pub fn cursor(&self) -> Option<usize> {
        self.cycle.as_ref().map(|c| c.cursor)
    }
}

/// Platform-wide switches and counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    pub paused: bool,
    pub kyc_required: bool,
    /// Platform-wide daily withdrawal limit (0 = unlimited)
    pub daily_withdrawal_limit: Amount,
    /// Day index the counter belongs to
    pub withdrawal_day: i64,
    pub withdrawn_today: Amount,
    /// Admin fees collected
    pub treasury_balance: Amount,
    /// Shares held outside the pools
    pub reserve_balance: Amount,
    pub total_users: u64,
    pub total_volume: Amount,
    pub total_withdrawn: Amount,
}

/// All ledger tables
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) addresses: HashMap<Address, UserId>,
    pub(crate) referral_codes: HashMap<String, UserId>,
    pub(crate) nodes: BTreeMap<NodeId, MatrixNode>,
    pub(crate) sponsored: HashMap<UserId, Vec<UserId>>,
    pub(crate) pools: BTreeMap<PoolKind, Pool>,
    pub(crate) globals: GlobalState,
}

impl LedgerState {
    /// Fresh state with every pool created
    pub fn new(config: &CompensationConfig) -> Self {
        let mut state = Self {
            globals: GlobalState {
                kyc_required: config.kyc_required,
                daily_withdrawal_limit: config.withdrawal.daily_limit(),
                ..GlobalState::default()
            },
            ..Self::default()
        };
        state.ensure_pools(config);
        state
    }

    /// Create missing pool rows and apply the configured intervals
    ///
    /// Runs on every open, so a changed schedule takes effect on the next
    /// due check. An in-flight cycle is unaffected.
    pub(crate) fn ensure_pools(&mut self, config: &CompensationConfig) {
        for kind in PoolKind::ALL {
            let interval = config.pools.interval_secs(kind);
            self.pools
                .entry(kind)
                .or_insert_with(|| Pool::new(kind, interval))
                .interval_secs = interval;
        }
    }

    pub fn user(&self, id: UserId) -> Result<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| CompensationError::UserNotFound(id.to_string()))
    }

    pub fn find_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn user_id_of(&self, address: &Address) -> Option<UserId> {
        self.addresses.get(address).copied()
    }

    pub fn user_by_address(&self, address: &Address) -> Result<&User> {
        self.user_id_of(address)
            .and_then(|id| self.users.get(&id))
            .ok_or_else(|| CompensationError::UserNotFound(address.to_string()))
    }

    /// Resolve a referral code (case-insensitive)
    pub fn user_id_by_referral_code(&self, code: &str) -> Option<UserId> {
        self.referral_codes.get(&code.trim().to_ascii_uppercase()).copied()
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn next_user_id(&self) -> UserId {
        UserId::new(self.users.len() as u64 + 1)
    }

    pub fn node(&self, id: NodeId) -> Result<&MatrixNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| CompensationError::Storage(format!("matrix node {} missing", id)))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MatrixNode> {
        self.nodes.values()
    }

    pub fn next_node_id(&self) -> NodeId {
        NodeId::new(self.nodes.len() as u64 + 1)
    }

    /// Direct children in the sponsor tree
    pub fn sponsored(&self, id: UserId) -> &[UserId] {
        self.sponsored.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pool(&self, kind: PoolKind) -> Result<&Pool> {
        self.pools
            .get(&kind)
            .ok_or_else(|| CompensationError::Storage(format!("pool {} missing", kind)))
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn globals(&self) -> &GlobalState {
        &self.globals
    }

    /// Sponsor chain above a user, nearest first, at most `depth` entries
    pub fn ancestors(&self, id: UserId, depth: usize) -> Result<Vec<UserId>> {
        let mut chain = Vec::with_capacity(depth.min(64));
        let mut seen = HashSet::from([id]);
        let mut current = self.user(id)?.sponsor;
        while let Some(sponsor) = current {
            if chain.len() == depth {
                break;
            }
            if !seen.insert(sponsor) {
                return Err(CompensationError::CyclicSponsor(sponsor));
            }
            chain.push(sponsor);
            current = self.user(sponsor)?.sponsor;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_core::usd;

    fn user(cap: Amount) -> User {
        User::new(
            UserId::new(1),
            Address::from_label(b"u1"),
            None,
            1,
            cap / 4,
            cap,
            NodeId::new(1),
            0,
        )
    }

    #[test]
    fn test_credit_respects_cap() {
        let mut u = user(usd(120));
        u.lifetime_earnings = usd(118);
        assert_eq!(u.cap_room(), usd(2));

        let credited = u.credit_earnings(usd(10));
        assert_eq!(credited, usd(2));
        assert_eq!(u.lifetime_earnings, u.earnings_cap);
        assert!(u.is_capped());
        assert_eq!(u.credit_earnings(usd(1)), 0);
    }

    #[test]
    fn test_matrix_slots_fill_left_first() {
        let mut node = MatrixNode::new(NodeId::new(1), UserId::new(1), None, 0);
        assert_eq!(node.free_slot(), Some(Side::Left));
        node.attach(Side::Left, NodeId::new(2)).unwrap();
        assert_eq!(node.free_slot(), Some(Side::Right));
        node.attach(Side::Right, NodeId::new(3)).unwrap();
        assert_eq!(node.free_slot(), None);
        assert_eq!(node.child_count(), 2);
        assert!(node.attach(Side::Left, NodeId::new(4)).is_err());
    }

    #[test]
    fn test_pool_due() {
        let mut pool = Pool::new(PoolKind::GlobalHelp, 100);
        assert!(pool.is_due(0));
        pool.last_distribution_at = Some(50);
        assert!(!pool.is_due(149));
        assert!(pool.is_due(150));
        assert_eq!(pool.next_due_at(), Some(150));
    }

    #[test]
    fn test_activity_never_moves_backwards() {
        let mut u = user(usd(120));
        u.touch(500);
        u.touch(100);
        assert_eq!(u.last_activity_at, 500);
        assert!(u.active_since(500));
        assert!(!u.active_since(501));
    }

    #[test]
    fn test_changed_schedule_applies_to_existing_pools() {
        let mut state = LedgerState::new(&CompensationConfig::default());
        let mut config = CompensationConfig::default();
        config.pools.help_interval_days = 3;
        state.ensure_pools(&config);
        assert_eq!(state.pool(PoolKind::GlobalHelp).unwrap().interval_secs, 3 * 86_400);
    }

    #[test]
    fn test_new_state_has_all_pools() {
        let state = LedgerState::new(&CompensationConfig::default());
        for kind in PoolKind::ALL {
            assert!(state.pool(kind).is_ok());
        }
        assert_eq!(state.pool(PoolKind::LeaderBonus).unwrap().interval_secs, 15 * 86_400);
        assert_eq!(state.globals().daily_withdrawal_limit, usd(50_000));
    }
}
