//! The sliding-window manager: owns a window of `Instance`s keyed by seqn,
//! derives membership from the store with the α-delay spec §4.4 requires,
//! routes inbound wire messages to the right instance, and pushes learned
//! values back onto the store's op channel.
//!
//! Messages addressed to this node's own id never touch the wire: they're
//! delivered straight back into the instance table, since every node is
//! always a member of its own acceptor set. Everything else is queued on
//! the `doozer_net::Node` for an external transport to drain.

use std::collections::{BTreeMap, VecDeque};

use doozer_net::{Msg, Node as NetNode, NodeId};
use doozer_store::Store;

use crate::instance::Instance;
use crate::registrar::{self, Membership};

/// Typical window width from spec §4.4.
pub const DEFAULT_ALPHA: u64 = 50;

pub struct Manager {
    self_id: NodeId,
    store: Store,
    net: NetNode,
    alpha: u64,
    instances: BTreeMap<u64, Instance>,
    next_candidate: u64,
}

impl Manager {
    pub fn new(self_id: NodeId, store: Store, alpha: u64) -> Manager {
        Manager { self_id, store, net: NetNode::new(), alpha, instances: BTreeMap::new(), next_candidate: 1 }
    }

    async fn membership_for(&self, seqn: u64) -> Membership {
        let as_of = seqn.saturating_sub(self.alpha).max(1);
        registrar::read_membership_as_of(&self.store, as_of).await
    }

    async fn instance_mut(&mut self, seqn: u64) -> &mut Instance {
        if !self.instances.contains_key(&seqn) {
            let membership = self.membership_for(seqn).await;
            let slot = membership.slot_of(&self.self_id).unwrap_or(0);
            self.instances.insert(seqn, Instance::new(seqn, membership.members, slot));
        }
        self.instances.get_mut(&seqn).expect("just inserted")
    }

    /// Blocks (by waiting on store membership sync) until it can return the
    /// next seqn this node owns by round-robin slot order.
    pub async fn next_seqn(&mut self) -> u64 {
        loop {
            let applied = self.store.applied().await;
            if self.next_candidate <= applied {
                // Seqns up to `applied` were settled (by us or by a peer
                // whose LEARN we caught) since we last looked; don't retry them.
                self.next_candidate = applied + 1;
            }
            let candidate = self.next_candidate;
            let membership = self.membership_for(candidate).await;
            self.next_candidate += 1;
            if membership.owner_of(candidate) == Some(&self.self_id) {
                return candidate;
            }
        }
    }

    pub async fn propose(&mut self, seqn: u64, value: String) {
        let inst = self.instance_mut(seqn).await;
        let outbox = inst.propose(value);
        self.drain(seqn, outbox.sends, outbox.decided).await;
    }

    /// Re-invites on a seqn whose proposal has stalled; a no-op if nothing
    /// is in flight there or it already decided.
    pub async fn retry(&mut self, seqn: u64) {
        if let Some(inst) = self.instances.get_mut(&seqn) {
            let outbox = inst.retry();
            self.drain(seqn, outbox.sends, outbox.decided).await;
        }
    }

    /// Routes a message addressed to a particular seqn's instance, dropping
    /// it if the seqn has already been applied or sits outside the window.
    pub async fn deliver(&mut self, from: NodeId, msg: Msg) {
        let seqn = msg.seqn();
        let applied = self.store.applied().await;
        if seqn <= applied || seqn > applied + self.alpha {
            return;
        }
        let inst = self.instance_mut(seqn).await;
        let outbox = inst.receive(from, msg);
        self.drain(seqn, outbox.sends, outbox.decided).await;
    }

    /// Sends every outgoing message, looping messages addressed to `self`
    /// straight back into the instance table rather than round-tripping
    /// them through the wire. Propagates any decision reached along the way
    /// to the store.
    async fn drain(&mut self, seqn: u64, sends: Vec<(NodeId, Msg)>, decided: Option<String>) {
        self.settle(seqn, decided).await;

        let mut queue: VecDeque<(u64, NodeId, Msg)> = sends.into_iter().map(|(to, msg)| (seqn, to, msg)).collect();
        while let Some((s, to, msg)) = queue.pop_front() {
            if to == self.self_id {
                let self_id = self.self_id.clone();
                let inst = self.instance_mut(s).await;
                let out = inst.receive(self_id, msg);
                queue.extend(out.sends.into_iter().map(|(t, m)| (s, t, m)));
                self.settle(s, out.decided).await;
            } else {
                self.net.send_msg(to, &msg);
            }
        }
    }

    async fn settle(&mut self, seqn: u64, decided: Option<String>) {
        if let Some(value) = decided {
            tracing::info!(seqn, %value, "paxos instance decided, handing to store");
            let _ = self.store.propose(seqn, value.into_bytes()).await;
            self.instances.remove(&seqn);
        }
    }

    pub fn pop_outgoing(&mut self) -> Option<(NodeId, Vec<u8>)> {
        self.net.pop_outgoing()
    }

    pub fn recv_bytes(&mut self, src: NodeId, buf: Vec<u8>) {
        self.net.recv_bytes(src, buf);
    }

    /// Routes every message currently queued in the inbound buffer.
    pub async fn pump(&mut self) {
        while let Some((src, msg)) = self.net.pop_incoming() {
            self.deliver(src, msg).await;
        }
    }
}

/// A cheap, cloneable handle that lets coordination primitives (session,
/// lock, timer) submit a mutation to be proposed on whatever seqn this node
/// next owns, without each of them needing its own `&mut Manager`. Backed
/// by a task that owns the `Manager` and serializes proposals through it.
#[derive(Clone)]
pub struct Proposer {
    tx: tokio::sync::mpsc::Sender<(String, tokio::sync::oneshot::Sender<u64>)>,
}

impl Proposer {
    /// Proposes `value` and returns the seqn it was assigned once decided.
    pub async fn propose(&self, value: String) -> u64 {
        let (reply, rx) = tokio::sync::oneshot::channel();
        if self.tx.send((value, reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Spawns the task that drives `manager`, returning a `Proposer` handle to it.
pub fn spawn_proposer(manager: Manager) -> Proposer {
    let (tx, rx) = tokio::sync::mpsc::channel(128);
    tokio::spawn(drive_proposer(manager, rx));
    Proposer { tx }
}

async fn drive_proposer(mut manager: Manager, mut rx: tokio::sync::mpsc::Receiver<(String, tokio::sync::oneshot::Sender<u64>)>) {
    while let Some((value, reply)) = rx.recv().await {
        let seqn = manager.next_seqn().await;
        manager.propose(seqn, value).await;
        let _ = reply.send(seqn);
    }
}
