//! Session-loss cleanup for advisory locks, grounded on the reference
//! `lock.Clean`: watch `/session/*`, and for every session that gets
//! deleted, delete every `/lock/**` file still holding that session's id.
//!
//! The walk uses the del event's own [`doozer_store::Event::snapshot`]
//! rather than a fresh read, so cleanup always sees the tree exactly as it
//! stood the instant the session vanished, not whatever landed afterward.

use doozer_paxos::Proposer;
use doozer_store::{Cas, ReadCas, Store};

/// Runs forever, deleting locks left behind by sessions as they expire.
/// Meant to be spawned once per node alongside the session reaper.
pub async fn clean(store: Store, proposer: Proposer) {
    let mut watch = store.watch("/session/*").await;
    while let Some(ev) = watch.recv().await {
        if !is_del(&ev) {
            continue;
        }
        let Some(session_id) = ev.path.rsplit('/').next() else { continue };
        tracing::info!(session = session_id, "lost session, sweeping locks");

        for lock_ev in doozer_store::walk_matching(&ev.snapshot, "/lock/**") {
            if lock_ev.body.first().map(String::as_str) != Some(session_id) {
                continue;
            }
            let cas = match lock_ev.cas {
                ReadCas::Seqn(n) => Cas::Seqn(n),
                _ => continue,
            };
            proposer.propose(format!("{cas}:{}", lock_ev.path)).await;
        }
    }
}

/// A del event carries no body and `ReadCas::Missing`; a set/renewal carries
/// a body and a real seqn cas. Mirrors the reference's `ev.IsDel()`.
fn is_del(ev: &doozer_store::Event) -> bool {
    ev.err.is_none() && ev.body.is_empty() && ev.cas == ReadCas::Missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use doozer_net::NodeId;
    use doozer_paxos::{spawn_proposer, Manager};

    async fn solo_proposer(store: Store) -> Proposer {
        store.propose(1, doozer_store::encode_set("/doozer/slot/0", Cas::Clobber, b"solo")).await.unwrap();
        store.sync(1).await;
        spawn_proposer(Manager::new(NodeId("solo".into()), store, 1))
    }

    #[tokio::test]
    async fn deletes_locks_held_by_a_lost_session() {
        let store = Store::spawn();
        let proposer = solo_proposer(store.clone()).await;

        proposer.propose(":/lock/a=s1".to_string()).await;
        proposer.propose(":/lock/b=s2".to_string()).await;
        proposer.propose(":/session/s1=alive".to_string()).await;

        tokio::spawn(clean(store.clone(), proposer.clone()));

        let del_seqn = proposer.propose(":/session/s1".to_string()).await;
        store.sync(del_seqn).await;

        // wait until /lock/a is gone rather than racing the cleaner.
        for _ in 0..200 {
            let (body, cas) = store.get("/lock/a").await;
            if cas == ReadCas::Missing {
                assert_eq!(body, vec![String::new()]);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let (_, cas) = store.get("/lock/a").await;
        assert_eq!(cas, ReadCas::Missing);

        let (body, _) = store.get("/lock/b").await;
        assert_eq!(body, vec!["s2".to_string()]);
    }
}
