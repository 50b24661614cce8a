//! # Placement Engine
//!
//! Links a new user into two independent structures:
//!
//! - the **sponsor tree** (unlimited width), used for level and upline bonuses
//! - the **binary matrix** (two children per node), filled breadth-first from
//!   the sponsor's node so that a full sponsor spills over to the next free slot
//!
//! ```text
//!            S                 S            sponsor S is full:
//!          /   \             /   \          the third referral lands
//!         a     b     →     a     b         under a (left first)
//!                          /
//!                         c
//! ```

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use tierflow_core::{
    CompensationError, LeaderRank, NodeId, RankThresholds, Result, UserId,
};
use tierflow_storage::{MatrixNode, Side, Transaction};

/// Where a new user was placed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// The new user's matrix node
    pub node: NodeId,
    /// Matrix parent (None for the root)
    pub matrix_parent: Option<NodeId>,
    pub side: Option<Side>,
    pub depth: u32,
    /// Sponsor tree parent
    pub sponsor: Option<UserId>,
    /// Ancestors whose leader rank rose because of this placement
    pub promotions: Vec<(UserId, LeaderRank)>,
}

/// Assigns sponsor-tree and matrix positions
pub struct PlacementEngine {
    ranks: RankThresholds,
}

impl PlacementEngine {
    pub fn new(ranks: RankThresholds) -> Self {
        Self { ranks }
    }

    /// Place `new_user` under `sponsor`
    ///
    /// Must run before the user row is inserted: the sponsor has to exist
    /// already, which keeps the sponsor graph acyclic.
    pub fn place(
        &self,
        tx: &mut Transaction<'_>,
        new_user: UserId,
        sponsor: Option<UserId>,
    ) -> Result<Placement> {
        let Some(sponsor) = sponsor else {
            return self.place_root(tx, new_user);
        };
        if sponsor == new_user {
            return Err(CompensationError::CyclicSponsor(new_user));
        }

        let sponsor_row = tx.find_user(sponsor).ok_or_else(|| {
            CompensationError::InvalidSponsor(format!("{} is not registered", sponsor))
        })?;
        if !sponsor_row.is_payable() {
            return Err(CompensationError::InvalidSponsor(format!(
                "{} is blacklisted or inactive",
                sponsor_row.address
            )));
        }
        let start = sponsor_row.matrix_node;

        let upline = tx.ancestors(sponsor, usize::MAX)?;
        if upline.contains(&new_user) {
            return Err(CompensationError::CyclicSponsor(new_user));
        }

        let (parent, side) = self.find_slot(tx, start)?;
        let depth = tx.node(parent)?.depth + 1;
        let node_id = tx.next_node_id();
        tx.insert_node(MatrixNode::new(node_id, new_user, Some(parent), depth))?;
        tx.node_mut(parent)?.attach(side, node_id)?;

        tx.push_sponsored(sponsor, new_user);
        tx.user_mut(sponsor)?.direct_referral_count += 1;

        let mut promotions = Vec::new();
        for ancestor in std::iter::once(sponsor).chain(upline) {
            let user = tx.user_mut(ancestor)?;
            user.team_size += 1;
            let earned = self.ranks.rank_for(user.direct_referral_count, user.team_size);
            if earned > user.leader_rank {
                user.leader_rank = earned;
                tracing::info!(user = %ancestor, rank = earned.name(), "Leader rank promoted");
                promotions.push((ancestor, earned));
            }
        }

        tracing::debug!(
            user = %new_user,
            sponsor = %sponsor,
            node = %node_id,
            parent = %parent,
            depth,
            "Placed user"
        );

        Ok(Placement {
            node: node_id,
            matrix_parent: Some(parent),
            side: Some(side),
            depth,
            sponsor: Some(sponsor),
            promotions,
        })
    }

    fn place_root(&self, tx: &mut Transaction<'_>, new_user: UserId) -> Result<Placement> {
        if tx.user_count() > 0 {
            return Err(CompensationError::InvalidSponsor(
                "a sponsor is required once the root is registered".into(),
            ));
        }
        let node_id = tx.next_node_id();
        tx.insert_node(MatrixNode::new(node_id, new_user, None, 0))?;
        tracing::info!(user = %new_user, "Placed root user");

        Ok(Placement {
            node: node_id,
            matrix_parent: None,
            side: None,
            depth: 0,
            sponsor: None,
            promotions: Vec::new(),
        })
    }

    /// Breadth-first search for the first node with a free slot
    fn find_slot(&self, tx: &Transaction<'_>, start: NodeId) -> Result<(NodeId, Side)> {
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            let node = tx.node(id)?;
            if let Some(side) = node.free_slot() {
                return Ok((id, side));
            }
            queue.extend(node.children());
        }
        Err(CompensationError::Storage(format!(
            "no free matrix slot below {}",
            start
        )))
    }
}
