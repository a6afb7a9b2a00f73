//! Top-level wiring: a running node is a store, a Paxos manager exposed as
//! a [`doozer_paxos::Proposer`], and the coordination primitives
//! ([`doozer_coord::lock`], [`doozer_coord::session`]) spawned against
//! them. [`Bootstrap`] pins the two ways a node comes up — first member or
//! joiner — as a plain enum for an external front-end to construct; no CLI
//! parsing lives in this crate. [`ClientOps`] pins the shape a request
//! dispatcher needs without shipping a line-protocol parser.

use std::net::SocketAddr;

use doozer_net::NodeId;
use doozer_paxos::{spawn_proposer, JoinResponse, Manager, Proposer, DEFAULT_ALPHA};
use doozer_store::{Cas, Event, ReadCas, Store, TooLate};

/// How a node comes up: as the sole founding member of a new cluster, or by
/// attaching to one that already exists. The socket dial that turns
/// `Join`'s `attach` address into a [`JoinResponse`] is a transport
/// concern and out of scope here (see `doozer_paxos::join`'s docs); an
/// embedding binary performs that dial and hands the response to
/// [`Replica::join`].
#[derive(Clone, Copy, Debug)]
pub enum Bootstrap {
    First { listen: SocketAddr },
    Join { attach: SocketAddr },
}

/// A running node: the store, a handle for submitting proposals, and the
/// background tasks (lock cleaner, session reaper) that keep the
/// coordination primitives alive for as long as the replica runs.
pub struct Replica {
    pub self_id: NodeId,
    pub store: Store,
    pub proposer: Proposer,
}

impl Replica {
    /// Founds a new cluster: inserts `self_id` as the sole member at seqn 1
    /// before any Paxos traffic can occur, then starts the usual tasks.
    pub async fn first(self_id: NodeId, listen: SocketAddr) -> doozer_base::Result<Replica> {
        let store = Store::spawn();
        doozer_paxos::bootstrap_first(&store, &self_id, &listen.to_string()).await?;
        Ok(Replica::spawn(self_id, store))
    }

    /// Joins an existing cluster using a [`JoinResponse`] already obtained
    /// (by dialing the attach address and running the join handshake
    /// through some external transport).
    pub async fn join(self_id: NodeId, resp: JoinResponse) -> doozer_base::Result<Replica> {
        let store = doozer_paxos::join_cluster(resp).await?;
        Ok(Replica::spawn(self_id, store))
    }

    fn spawn(self_id: NodeId, store: Store) -> Replica {
        let manager = Manager::new(self_id.clone(), store.clone(), DEFAULT_ALPHA);
        let proposer = spawn_proposer(manager);
        tokio::spawn(doozer_coord::lock::clean(store.clone(), proposer.clone()));
        tokio::spawn(doozer_coord::session::clean(store.clone(), proposer.clone()));
        Replica { self_id, store, proposer }
    }
}

/// The operations an external client dispatcher needs to implement a wire
/// protocol against. No line-protocol parser ships here (spec.md §1 scopes
/// that out); this only pins the shape.
#[async_trait::async_trait]
pub trait ClientOps {
    async fn get(&self, path: &str) -> (Vec<String>, ReadCas);
    async fn set(&self, path: &str, cas: Cas, value: Vec<u8>) -> doozer_base::Result<u64>;
    async fn del(&self, path: &str, cas: Cas) -> doozer_base::Result<u64>;
    async fn watch(&self, glob: &str) -> tokio::sync::mpsc::UnboundedReceiver<Event>;
    async fn wait(&self, seqn: u64) -> Result<Event, TooLate>;
    async fn sync(&self, seqn: u64);
    async fn snapshot(&self) -> Vec<u8>;
}

#[async_trait::async_trait]
impl ClientOps for Replica {
    async fn get(&self, path: &str) -> (Vec<String>, ReadCas) {
        self.store.get(path).await
    }

    /// Proposes the set and waits for it to be applied, returning the seqn
    /// it landed at. A Paxos-learned value travels through the instance
    /// machinery as a `String` (spec.md §4.3's wire values are textual
    /// instruction forms), so a non-UTF-8 `value` can't be proposed through
    /// consensus and is rejected up front.
    async fn set(&self, path: &str, cas: Cas, value: Vec<u8>) -> doozer_base::Result<u64> {
        let value = String::from_utf8(value)
            .map_err(|_| doozer_base::err("set: value must be valid UTF-8 to travel through consensus"))?;
        let seqn = self.proposer.propose(format!("{cas}:{path}={value}")).await;
        self.store.sync(seqn).await;
        Ok(seqn)
    }

    async fn del(&self, path: &str, cas: Cas) -> doozer_base::Result<u64> {
        let seqn = self.proposer.propose(format!("{cas}:{path}")).await;
        self.store.sync(seqn).await;
        Ok(seqn)
    }

    async fn watch(&self, glob: &str) -> tokio::sync::mpsc::UnboundedReceiver<Event> {
        self.store.watch(glob).await
    }

    async fn wait(&self, seqn: u64) -> Result<Event, TooLate> {
        self.store.wait(seqn).await
    }

    async fn sync(&self, seqn: u64) {
        self.store.sync(seqn).await
    }

    async fn snapshot(&self) -> Vec<u8> {
        self.store.snapshot().await
    }
}
