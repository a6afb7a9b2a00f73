//! Bootstrap and join/catch-up, per spec §6's "Bootstrap flags" and the
//! reference's `juntad` entry point: a node starts either as the first
//! cluster member (self-inserts into membership at seqn 1, synchronously,
//! no consensus needed since there's no quorum to agree with yet) or as a
//! joiner that fetches a snapshot and a starting seqn from an existing
//! member and catches up from there. The actual socket dial that carries
//! the request/response below is out of scope; this module only pins the
//! shape of the handshake.

use doozer_net::NodeId;
use doozer_store::{Cas, Store};

/// What a joiner sends to an existing member to ask for admission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinRequest {
    pub joiner: NodeId,
    pub addr: String,
}

/// What the existing member hands back: the seqn the joiner should resume
/// proposing from, and a snapshot of the tree as of that point.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinResponse {
    pub resume_seqn: u64,
    pub snapshot: Vec<u8>,
}

/// Inserts this node into membership at seqn 1, ahead of any Paxos traffic.
/// Spec §9 ("Membership as data") requires this to happen synchronously
/// before the node accepts Paxos messages — there's no cluster yet to run
/// consensus with.
pub async fn bootstrap_first(store: &Store, self_id: &NodeId, listen_addr: &str) -> doozer_base::Result<()> {
    store
        .propose(1, doozer_store::encode_set(&format!("/doozer/members/{}", self_id), Cas::Clobber, listen_addr.as_bytes()))
        .await?;
    store.sync(1).await;
    store
        .propose(2, doozer_store::encode_set("/doozer/slot/0", Cas::Clobber, self_id.0.as_bytes()))
        .await?;
    store.sync(2).await;
    Ok(())
}

/// The existing member's side of a join request: admits the joiner into
/// membership (via the caller's `Manager`, so it goes through consensus
/// like any other mutation) at the next slot index, then snapshots the
/// tree for the joiner to bootstrap from.
pub async fn handle_join_request(
    store: &Store,
    manager: &mut crate::manager::Manager,
    req: JoinRequest,
) -> doozer_base::Result<JoinResponse> {
    let membership = crate::registrar::read_membership(store).await;
    let next_slot = membership.members.len() as u64;

    let member_seqn = manager.next_seqn().await;
    manager
        .propose(member_seqn, format!(":{}={}", format!("/doozer/members/{}", req.joiner), req.addr))
        .await;
    store.sync(member_seqn).await;

    let slot_seqn = manager.next_seqn().await;
    manager.propose(slot_seqn, format!(":/doozer/slot/{next_slot}={}", req.joiner)).await;
    store.sync(slot_seqn).await;

    // The joiner resumes from whatever seqn comes next overall, not the
    // next seqn *this* node happens to own — ownership may now belong to
    // the joiner itself under the membership just admitted.
    let resume_seqn = store.applied().await + 1;
    Ok(JoinResponse { resume_seqn, snapshot: store.snapshot().await })
}

/// The joiner's side: spins up a fresh local store and catches it up to
/// the snapshot handed back by `handle_join_request`.
pub async fn join_cluster(resp: JoinResponse) -> doozer_base::Result<Store> {
    let store = Store::spawn();
    store.propose(1, resp.snapshot).await?;
    store.sync(1).await;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;

    #[tokio::test]
    async fn first_node_inserts_itself_synchronously() {
        let store = Store::spawn();
        let id = NodeId("solo".into());
        bootstrap_first(&store, &id, "127.0.0.1:8040").await.unwrap();

        let (body, _) = store.get("/doozer/members/solo").await;
        assert_eq!(body, vec!["127.0.0.1:8040".to_string()]);
        let (body, _) = store.get("/doozer/slot/0").await;
        assert_eq!(body, vec!["solo".to_string()]);
    }

    #[tokio::test]
    async fn joiner_catches_up_from_a_snapshot() {
        let store = Store::spawn();
        let id = NodeId("solo".into());
        bootstrap_first(&store, &id, "127.0.0.1:8040").await.unwrap();
        store
            .propose(3, doozer_store::encode_set("/greeting", Cas::Clobber, b"hi"))
            .await
            .unwrap();
        store.sync(3).await;

        let snapshot = store.snapshot().await;
        let resp = JoinResponse { resume_seqn: 4, snapshot };
        let joined = join_cluster(resp).await.unwrap();

        let (body, _) = joined.get("/greeting").await;
        assert_eq!(body, vec!["hi".to_string()]);
        let (body, _) = joined.get("/doozer/members/solo").await;
        assert_eq!(body, vec!["127.0.0.1:8040".to_string()]);
    }

    #[tokio::test]
    async fn existing_member_admits_a_joiner_through_consensus() {
        let store = Store::spawn();
        let id = NodeId("solo".into());
        bootstrap_first(&store, &id, "127.0.0.1:8040").await.unwrap();

        let mut mgr = Manager::new(id, store.clone(), 1);
        let req = JoinRequest { joiner: NodeId("new".into()), addr: "127.0.0.1:8041".into() };
        let resp = handle_join_request(&store, &mut mgr, req).await.unwrap();

        let (body, _) = store.get("/doozer/members/new").await;
        assert_eq!(body, vec!["127.0.0.1:8041".to_string()]);
        let (body, _) = store.get("/doozer/slot/1").await;
        assert_eq!(body, vec!["new".to_string()]);

        let joined = join_cluster(resp).await.unwrap();
        let (body, _) = joined.get("/doozer/members/new").await;
        assert_eq!(body, vec!["127.0.0.1:8041".to_string()]);
    }
}
