//! Membership and quorum, derived from the tree itself rather than tracked
//! out of band. `/doozer/members/<id> = <host:port>` and
//! `/doozer/slot/<index> = <id>` together define, for any seqn, which nodes
//! are acceptors and in what round-robin order they own future seqns.

use doozer_net::NodeId;
use doozer_store::{Store, ReadCas};

/// The acceptor set as of a particular moment, ordered by slot index so
/// every replica derives the same round numbering for the same membership.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Membership {
    pub members: Vec<NodeId>,
}

impl Membership {
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// The slot index of `id` within this membership, used as `Instance`'s
    /// round base. Nodes not in the membership have no slot.
    pub fn slot_of(&self, id: &NodeId) -> Option<u64> {
        self.members.iter().position(|m| m == id).map(|i| i as u64)
    }

    /// Which member owns seqn `seqn` by round-robin over slot order.
    pub fn owner_of(&self, seqn: u64) -> Option<&NodeId> {
        if self.members.is_empty() {
            return None;
        }
        self.members.get((seqn as usize) % self.members.len())
    }
}

/// Reads the current membership out of `/doozer/slot/*`, which pins
/// round-robin order explicitly (rather than relying on `/doozer/members/*`
/// enumeration order, which carries no ordering guarantee).
pub async fn read_membership(store: &Store) -> Membership {
    let (slots, cas) = store.get("/doozer/slot").await;
    if cas != ReadCas::Dir {
        return Membership { members: Vec::new() };
    }
    let mut indices: Vec<u64> = slots.iter().filter_map(|s| s.parse().ok()).collect();
    indices.sort_unstable();

    let mut members = Vec::with_capacity(indices.len());
    for idx in indices {
        let (body, cas) = store.get(&format!("/doozer/slot/{idx}")).await;
        if let (ReadCas::Seqn(_), Some(id)) = (cas, body.into_iter().next()) {
            members.push(NodeId(id));
        }
    }
    Membership { members }
}

/// Reads membership "as of seqn − α" per spec §4.4's membership-sync rule:
/// a snapshot of the tree taken once the store has applied at least
/// `target_seqn` is what the caller must hand in as `store`'s state. This
/// function itself is agnostic to *which* seqn the store is at; the α-delay
/// is enforced by the manager deciding when to call it.
pub async fn read_membership_as_of(store: &Store, as_of_seqn: u64) -> Membership {
    store.sync(as_of_seqn).await;
    read_membership(store).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_has_no_members() {
        let store = Store::spawn();
        let m = read_membership(&store).await;
        assert!(m.members.is_empty());
    }

    #[tokio::test]
    async fn members_are_ordered_by_slot_index() {
        let store = Store::spawn();
        store.propose(1, doozer_store::encode_set("/doozer/slot/1", doozer_store::Cas::Clobber, b"b")).await.unwrap();
        store.propose(2, doozer_store::encode_set("/doozer/slot/0", doozer_store::Cas::Clobber, b"a")).await.unwrap();
        store.sync(2).await;

        let m = read_membership(&store).await;
        assert_eq!(m.members, vec![NodeId("a".into()), NodeId("b".into())]);
        assert_eq!(m.quorum(), 2);
        assert_eq!(m.slot_of(&NodeId("b".into())), Some(1));
    }
}
