//! Transactional ledger
//!
//! Every write goes through [`Ledger::transact`]. The closure receives a
//! [`Transaction`] that records the original value of each row before its
//! first mutation. If the closure fails, or the snapshot cannot be persisted,
//! the recorded rows are restored and nothing of the call is observable.
//!
//! Transactions are serialized by a single lock, which gives the same
//! isolation as a SERIALIZABLE database transaction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use tierflow_core::{
    Address, CompensationConfig, CompensationError, NodeId, PoolKind, Result, UserId,
};

use crate::model::{GlobalState, LedgerState, MatrixNode, Pool, User};

/// File name of the persisted snapshot inside the data directory
pub const SNAPSHOT_FILE: &str = "ledger.bin";

/// Durable store of users, matrix nodes and pools
pub struct Ledger {
    state: Mutex<LedgerState>,
    snapshot_path: Option<PathBuf>,
}

impl Ledger {
    /// Volatile ledger, for tests and simulations
    pub fn in_memory(config: &CompensationConfig) -> Self {
        Self {
            state: Mutex::new(LedgerState::new(config)),
            snapshot_path: None,
        }
    }

    /// Open (or create) a file-backed ledger in `data_dir`
    pub fn open(data_dir: impl AsRef<Path>, config: &CompensationConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|e| {
            CompensationError::Storage(format!("create {}: {}", data_dir.display(), e))
        })?;
        let path = data_dir.join(SNAPSHOT_FILE);

        let state = if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| CompensationError::Storage(format!("read {}: {}", path.display(), e)))?;
            let mut state: LedgerState = bincode::deserialize(&bytes)
                .map_err(|e| CompensationError::Serialization(e.to_string()))?;
            state.ensure_pools(config);
            tracing::info!(
                path = %path.display(),
                users = state.user_count(),
                "Loaded ledger snapshot"
            );
            state
        } else {
            tracing::info!(path = %path.display(), "Creating new ledger");
            let state = LedgerState::new(config);
            write_snapshot(&path, &state)?;
            state
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot_path: Some(path),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.snapshot_path.is_some()
    }

    /// Run `f` as one atomic unit
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.state.lock();
        let mut tx = Transaction::new(&mut *guard);

        let outcome = f(&mut tx).and_then(|value| {
            if tx.is_dirty() {
                if let Some(path) = &self.snapshot_path {
                    write_snapshot(path, &tx)?;
                }
            }
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "Rolling back ledger transaction");
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Read a consistent view of the ledger
    pub fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> T {
        let guard = self.state.lock();
        f(&guard)
    }

    /// Clone the full state (read-model exports, tests)
    pub fn snapshot(&self) -> LedgerState {
        self.state.lock().clone()
    }
}

fn write_snapshot(path: &Path, state: &LedgerState) -> Result<()> {
    let bytes =
        bincode::serialize(state).map_err(|e| CompensationError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("bin.tmp");
    let storage_err = |e: std::io::Error| CompensationError::Storage(format!("{}: {}", tmp.display(), e));

    let mut file = fs::File::create(&tmp).map_err(storage_err)?;
    file.write_all(&bytes).map_err(storage_err)?;
    file.sync_all().map_err(storage_err)?;
    fs::rename(&tmp, path)
        .map_err(|e| CompensationError::Storage(format!("rename {}: {}", path.display(), e)))
}

/// Original values of every row touched by a transaction
#[derive(Default)]
struct UndoLog {
    users: HashMap<UserId, Option<User>>,
    addresses: Vec<Address>,
    referral_codes: Vec<String>,
    nodes: HashMap<NodeId, Option<MatrixNode>>,
    sponsored: HashMap<UserId, Option<Vec<UserId>>>,
    pools: HashMap<PoolKind, Pool>,
    globals: Option<GlobalState>,
}

impl UndoLog {
    fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.addresses.is_empty()
            && self.referral_codes.is_empty()
            && self.nodes.is_empty()
            && self.sponsored.is_empty()
            && self.pools.is_empty()
            && self.globals.is_none()
    }
}

/// Mutable access to the ledger inside [`Ledger::transact`]
///
/// Reads go through `Deref<Target = LedgerState>`; writes go through the
/// tracked `*_mut` and `insert_*` methods.
pub struct Transaction<'a> {
    state: &'a mut LedgerState,
    undo: UndoLog,
}

impl<'a> Transaction<'a> {
    fn new(state: &'a mut LedgerState) -> Self {
        Self {
            state,
            undo: UndoLog::default(),
        }
    }

    fn is_dirty(&self) -> bool {
        !self.undo.is_empty()
    }

    fn commit(self) {}

    fn rollback(self) {
        let Transaction { state, undo } = self;

        for (id, original) in undo.users {
            match original {
                Some(user) => {
                    state.users.insert(id, user);
                }
                None => {
                    state.users.remove(&id);
                }
            }
        }
        for address in undo.addresses {
            state.addresses.remove(&address);
        }
        for code in undo.referral_codes {
            state.referral_codes.remove(&code);
        }
        for (id, original) in undo.nodes {
            match original {
                Some(node) => {
                    state.nodes.insert(id, node);
                }
                None => {
                    state.nodes.remove(&id);
                }
            }
        }
        for (id, original) in undo.sponsored {
            match original {
                Some(children) => {
                    state.sponsored.insert(id, children);
                }
                None => {
                    state.sponsored.remove(&id);
                }
            }
        }
        for (kind, pool) in undo.pools {
            state.pools.insert(kind, pool);
        }
        if let Some(globals) = undo.globals {
            state.globals = globals;
        }
    }

    /// Insert a new user row
    ///
    /// A referral code already held by someone else gets the user id
    /// appended.
    pub fn insert_user(&mut self, mut user: User) -> Result<()> {
        if self.state.addresses.contains_key(&user.address) {
            return Err(CompensationError::AlreadyRegistered(user.address));
        }
        if self.state.users.contains_key(&user.id) {
            return Err(CompensationError::Storage(format!(
                "user id {} already allocated",
                user.id
            )));
        }
        user.referral_code = user.referral_code.trim().to_ascii_uppercase();
        if user.referral_code.is_empty() {
            user.referral_code = user.address.referral_code();
        }
        if self.state.referral_codes.contains_key(&user.referral_code) {
            user.referral_code = format!("{}{}", user.referral_code, user.id);
        }
        if self.state.referral_codes.contains_key(&user.referral_code) {
            return Err(CompensationError::Storage(format!(
                "referral code {} already taken",
                user.referral_code
            )));
        }

        self.undo.users.entry(user.id).or_insert(None);
        self.undo.addresses.push(user.address);
        self.undo.referral_codes.push(user.referral_code.clone());
        self.state.addresses.insert(user.address, user.id);
        self.state.referral_codes.insert(user.referral_code.clone(), user.id);
        self.state.users.insert(user.id, user);
        Ok(())
    }

    pub fn user_mut(&mut self, id: UserId) -> Result<&mut User> {
        let Transaction { state, undo } = self;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| CompensationError::UserNotFound(id.to_string()))?;
        undo.users.entry(id).or_insert_with(|| Some(user.clone()));
        Ok(user)
    }

    /// Insert a new matrix node
    pub fn insert_node(&mut self, node: MatrixNode) -> Result<()> {
        if self.state.nodes.contains_key(&node.id) {
            return Err(CompensationError::Storage(format!(
                "matrix node {} already allocated",
                node.id
            )));
        }
        self.undo.nodes.entry(node.id).or_insert(None);
        self.state.nodes.insert(node.id, node);
        Ok(())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut MatrixNode> {
        let Transaction { state, undo } = self;
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| CompensationError::Storage(format!("matrix node {} missing", id)))?;
        undo.nodes.entry(id).or_insert_with(|| Some(node.clone()));
        Ok(node)
    }

    /// Append a child to a sponsor's list in the sponsor tree
    pub fn push_sponsored(&mut self, sponsor: UserId, child: UserId) {
        let Transaction { state, undo } = self;
        undo.sponsored
            .entry(sponsor)
            .or_insert_with(|| state.sponsored.get(&sponsor).cloned());
        state.sponsored.entry(sponsor).or_default().push(child);
    }

    pub fn pool_mut(&mut self, kind: PoolKind) -> Result<&mut Pool> {
        let Transaction { state, undo } = self;
        let pool = state
            .pools
            .get_mut(&kind)
            .ok_or_else(|| CompensationError::Storage(format!("pool {} missing", kind)))?;
        undo.pools.entry(kind).or_insert_with(|| pool.clone());
        Ok(pool)
    }

    pub fn globals_mut(&mut self) -> &mut GlobalState {
        let Transaction { state, undo } = self;
        if undo.globals.is_none() {
            undo.globals = Some(state.globals.clone());
        }
        &mut state.globals
    }
}

impl Deref for Transaction<'_> {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierflow_core::usd;

    fn new_user(state: &LedgerState, label: &str) -> User {
        User::new(
            state.next_user_id(),
            Address::from_label(label.as_bytes()),
            None,
            1,
            usd(30),
            usd(120),
            NodeId::new(1),
            0,
        )
    }

    #[test]
    fn test_commit_applies_writes() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());

        ledger
            .transact(|tx| {
                let user = new_user(tx, "alice");
                tx.insert_user(user)?;
                tx.pool_mut(PoolKind::GlobalHelp)?.balance += usd(9);
                tx.globals_mut().total_users += 1;
                Ok(())
            })
            .unwrap();

        ledger.read(|state| {
            assert_eq!(state.user_count(), 1);
            assert_eq!(state.pool(PoolKind::GlobalHelp).unwrap().balance, usd(9));
            assert_eq!(state.globals().total_users, 1);
        });
    }

    #[test]
    fn test_error_rolls_back_everything() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        ledger
            .transact(|tx| {
                let user = new_user(tx, "root");
                tx.insert_user(user)
            })
            .unwrap();
        let before = ledger.snapshot();

        let result: Result<()> = ledger.transact(|tx| {
            let user = new_user(tx, "bob");
            tx.insert_user(user)?;
            tx.user_mut(UserId::new(1))?.team_size += 1;
            tx.push_sponsored(UserId::new(1), UserId::new(2));
            tx.insert_node(MatrixNode::new(NodeId::new(7), UserId::new(2), None, 0))?;
            tx.pool_mut(PoolKind::LeaderBonus)?.balance += 5;
            tx.globals_mut().paused = true;
            Err(CompensationError::Paused)
        });

        assert_eq!(result, Err(CompensationError::Paused));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        let result = ledger.transact(|tx| {
            let first = new_user(tx, "carol");
            tx.insert_user(first.clone())?;
            let mut second = first;
            second.id = UserId::new(2);
            tx.insert_user(second)
        });
        assert!(matches!(result, Err(CompensationError::AlreadyRegistered(_))));
        assert_eq!(ledger.read(|s| s.user_count()), 0);
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompensationConfig::default();

        {
            let ledger = Ledger::open(dir.path(), &config).unwrap();
            assert!(ledger.is_persistent());
            ledger
                .transact(|tx| {
                    let user = new_user(tx, "dave");
                    tx.insert_user(user)?;
                    tx.pool_mut(PoolKind::Club)?.balance = usd(3);
                    Ok(())
                })
                .unwrap();
        }

        let reopened = Ledger::open(dir.path(), &config).unwrap();
        reopened.read(|state| {
            assert_eq!(state.user_count(), 1);
            let dave = state.user_by_address(&Address::from_label(b"dave")).unwrap();
            assert_eq!(dave.earnings_cap, usd(120));
            assert_eq!(state.pool(PoolKind::Club).unwrap().balance, usd(3));
        });
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        ledger
            .transact(|tx| {
                for i in 0..4u64 {
                    let mut user = new_user(tx, &format!("u{}", i));
                    if i > 0 {
                        user.sponsor = Some(UserId::new(i));
                    }
                    tx.insert_user(user)?;
                }
                Ok(())
            })
            .unwrap();

        let chain = ledger.read(|s| s.ancestors(UserId::new(4), 30)).unwrap();
        assert_eq!(chain, vec![UserId::new(3), UserId::new(2), UserId::new(1)]);
        let short = ledger.read(|s| s.ancestors(UserId::new(4), 2)).unwrap();
        assert_eq!(short.len(), 2);
    }

    #[test]
    fn test_ancestors_detects_sponsor_cycle() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        ledger
            .transact(|tx| {
                for i in 0..3u64 {
                    let mut user = new_user(tx, &format!("u{}", i));
                    if i > 0 {
                        user.sponsor = Some(UserId::new(i));
                    }
                    tx.insert_user(user)?;
                }
                // 1 -> 3 -> 2 -> 1
                tx.user_mut(UserId::new(1))?.sponsor = Some(UserId::new(3));
                Ok(())
            })
            .unwrap();

        let result = ledger.read(|s| s.ancestors(UserId::new(3), usize::MAX));
        assert_eq!(result, Err(CompensationError::CyclicSponsor(UserId::new(3))));
        let bounded = ledger.read(|s| s.ancestors(UserId::new(3), 2)).unwrap();
        assert_eq!(bounded, vec![UserId::new(2), UserId::new(1)]);
    }

    #[test]
    fn test_deep_chain_walk() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        ledger
            .transact(|tx| {
                for i in 0..5_000u64 {
                    let mut user = new_user(tx, &format!("d{}", i));
                    if i > 0 {
                        user.sponsor = Some(UserId::new(i));
                    }
                    tx.insert_user(user)?;
                }
                Ok(())
            })
            .unwrap();
        let chain = ledger.read(|s| s.ancestors(UserId::new(5_000), usize::MAX)).unwrap();
        assert_eq!(chain.len(), 4_999);
        assert_eq!(chain.last(), Some(&UserId::new(1)));
    }

    #[test]
    fn test_referral_codes_indexed_and_rolled_back() {
        let ledger = Ledger::in_memory(&CompensationConfig::default());
        let erin = Address::from_label(b"erin");
        ledger
            .transact(|tx| {
                let user = new_user(tx, "erin");
                tx.insert_user(user)
            })
            .unwrap();
        let code = erin.referral_code().to_ascii_lowercase();
        assert_eq!(ledger.read(|s| s.user_id_by_referral_code(&code)), Some(UserId::new(1)));

        // Same code requested again gets the id appended
        ledger
            .transact(|tx| {
                let mut user = new_user(tx, "frank");
                user.referral_code = erin.referral_code();
                tx.insert_user(user)
            })
            .unwrap();
        let suffixed = format!("{}2", erin.referral_code());
        assert_eq!(ledger.read(|s| s.user_id_by_referral_code(&suffixed)), Some(UserId::new(2)));

        let _ = ledger.transact(|tx| {
            let user = new_user(tx, "gina");
            tx.insert_user(user)?;
            Err::<(), _>(CompensationError::Paused)
        });
        let gina = Address::from_label(b"gina").referral_code();
        assert_eq!(ledger.read(|s| s.user_id_by_referral_code(&gina)), None);
    }
}
