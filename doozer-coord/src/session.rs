//! Session expiry: a `/session/<id>` file's body is a deadline in
//! nanoseconds, rearmed on every applied `Set`; when the deadline passes
//! without a renewal, the session is deleted, which in turn is what
//! `lock::clean` watches for to release that session's locks.
//!
//! The reference leaves this half-built (a `TODO` at the rearm point in
//! the Go session package); its min-heap is exactly the `timer` primitive's,
//! so this module is a thin instantiation of [`crate::timer::drive`] over
//! `/session/*` rather than a second heap implementation.

use doozer_paxos::Proposer;
use doozer_store::Store;

/// Runs forever, deleting sessions whose deadline has passed. Spawn once
/// per node alongside [`crate::lock::clean`].
pub async fn clean(store: Store, proposer: Proposer) {
    crate::timer::drive(store, "/session/*", proposer, None).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use doozer_net::NodeId;
    use doozer_paxos::{spawn_proposer, Manager};
    use doozer_store::{Cas, ReadCas};
    use std::time::Duration;

    #[tokio::test]
    async fn deletes_a_session_once_its_deadline_passes() {
        let store = Store::spawn();
        store.propose(1, doozer_store::encode_set("/doozer/slot/0", Cas::Clobber, b"solo")).await.unwrap();
        store.sync(1).await;
        let proposer = spawn_proposer(Manager::new(NodeId("solo".into()), store.clone(), 1));

        let deadline = crate::timer::now_ns() + 20_000_000;
        let seqn = proposer.propose(format!(":/session/a={deadline}")).await;
        store.sync(seqn).await;

        tokio::spawn(clean(store.clone(), proposer));

        for _ in 0..300 {
            let (_, cas) = store.get("/session/a").await;
            if cas == ReadCas::Missing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was never expired");
    }

    #[tokio::test]
    async fn a_renewal_before_the_deadline_prevents_expiry() {
        let store = Store::spawn();
        store.propose(1, doozer_store::encode_set("/doozer/slot/0", Cas::Clobber, b"solo")).await.unwrap();
        store.sync(1).await;
        let proposer = spawn_proposer(Manager::new(NodeId("solo".into()), store.clone(), 1));

        let short_deadline = crate::timer::now_ns() + 15_000_000;
        let seqn = proposer.propose(format!(":/session/a={short_deadline}")).await;
        store.sync(seqn).await;

        tokio::spawn(clean(store.clone(), proposer.clone()));

        tokio::time::sleep(Duration::from_millis(5)).await;
        let far_deadline = crate::timer::now_ns() + 1_000_000_000;
        let (_, cas) = store.get("/session/a").await;
        let ReadCas::Seqn(n) = cas else { panic!("session should still exist") };
        let seqn = proposer.propose(format!("{}:/session/a={far_deadline}", Cas::Seqn(n))).await;
        store.sync(seqn).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (body, cas) = store.get("/session/a").await;
        assert_ne!(cas, ReadCas::Missing);
        assert_eq!(body, vec![far_deadline.to_string()]);
    }
}
