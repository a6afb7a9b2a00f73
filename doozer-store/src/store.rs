//! The store engine: a single task owning the tree, reachable only through
//! `Store`'s async handle methods. All ordering, watch fan-out, and query
//! answering happens on that one task so every observer sees a consistent
//! view (spec §4.2: "synchronous queries... posted to the same
//! serialization point").

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::TooLate;
use crate::glob::glob_match;
use crate::node::{self, Event, Node, ReadCas};

/// A single ordered mutation destined for the tree, as handed to the store
/// by the Paxos manager once a seqn is learned.
#[derive(Clone, Debug)]
pub struct Op {
    pub seqn: u64,
    pub mutation: Vec<u8>,
}

enum Query {
    Get { path: String, reply: oneshot::Sender<(Vec<String>, ReadCas)> },
    Sync { seqn: u64, reply: oneshot::Sender<()> },
    SyncPath { path: String, reply: oneshot::Sender<Arc<Node>> },
    Watch { glob: String, tx: mpsc::UnboundedSender<Event> },
    GetDirAndWatch { path: String, tx: mpsc::UnboundedSender<Event> },
    Wait { seqn: u64, reply: oneshot::Sender<WaitOutcome> },
    Applied { reply: oneshot::Sender<u64> },
}

enum WaitOutcome {
    Applied(Event),
    TooLate,
}

struct WatchEntry {
    glob: String,
    tx: mpsc::UnboundedSender<Event>,
}

struct StoreState {
    applied: u64,
    root: Arc<Node>,
    todo: BinaryHeap<Reverse<(u64, Vec<u8>)>>,
    watches: Vec<WatchEntry>,
    sync_waiters: Vec<(u64, oneshot::Sender<()>)>,
    sync_path_waiters: Vec<(String, oneshot::Sender<Arc<Node>>)>,
    waits: Vec<(u64, oneshot::Sender<WaitOutcome>)>,
}

impl StoreState {
    fn new() -> StoreState {
        StoreState {
            applied: 0,
            root: Node::empty_dir(),
            todo: BinaryHeap::new(),
            watches: Vec::new(),
            sync_waiters: Vec::new(),
            sync_path_waiters: Vec::new(),
            waits: Vec::new(),
        }
    }
}

/// A handle to a running store task. Cheap to clone; every clone talks to
/// the same underlying actor.
#[derive(Clone)]
pub struct Store {
    ops_tx: mpsc::Sender<Op>,
    queries_tx: mpsc::Sender<Query>,
}

impl Store {
    pub fn spawn() -> Store {
        let (ops_tx, ops_rx) = mpsc::channel(1024);
        let (queries_tx, queries_rx) = mpsc::channel(1024);
        tokio::spawn(run(ops_rx, queries_rx));
        Store { ops_tx, queries_tx }
    }

    pub async fn propose(&self, seqn: u64, mutation: Vec<u8>) -> doozer_base::Result<()> {
        self.ops_tx
            .send(Op { seqn, mutation })
            .await
            .map_err(|_| doozer_base::err("store task is gone"))
    }

    pub async fn get(&self, path: &str) -> (Vec<String>, ReadCas) {
        let (reply, rx) = oneshot::channel();
        if self.queries_tx.send(Query::Get { path: path.to_string(), reply }).await.is_err() {
            return (vec![String::new()], ReadCas::Missing);
        }
        rx.await.unwrap_or((vec![String::new()], ReadCas::Missing))
    }

    pub async fn sync(&self, seqn: u64) {
        let (reply, rx) = oneshot::channel();
        if self.queries_tx.send(Query::Sync { seqn, reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn sync_path(&self, path: &str) -> Option<Arc<Node>> {
        let (reply, rx) = oneshot::channel();
        self.queries_tx.send(Query::SyncPath { path: path.to_string(), reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn watch(&self, glob: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.queries_tx.send(Query::Watch { glob: glob.to_string(), tx }).await;
        rx
    }

    pub async fn get_dir_and_watch(&self, path: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.queries_tx.send(Query::GetDirAndWatch { path: path.to_string(), tx }).await;
        rx
    }

    /// Serializes the current tree as a mutation-op payload suitable for
    /// handing to a joining node's `propose`: a length-prefixed applied
    /// seqn followed by the `bincode`-encoded tree (spec §6).
    pub async fn snapshot(&self) -> Vec<u8> {
        let applied = self.applied().await;
        let root = self.sync_path("/").await.unwrap_or_else(Node::empty_dir);
        let tree_bytes = bincode::serialize(root.as_ref()).expect("tree nodes always serialize");
        crate::mutation::encode_snapshot(applied, &tree_bytes)
    }

    pub async fn applied(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.queries_tx.send(Query::Applied { reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn wait(&self, seqn: u64) -> Result<Event, TooLate> {
        let (reply, rx) = oneshot::channel();
        if self.queries_tx.send(Query::Wait { seqn, reply }).await.is_err() {
            return Err(TooLate);
        }
        match rx.await {
            Ok(WaitOutcome::Applied(ev)) => Ok(ev),
            Ok(WaitOutcome::TooLate) | Err(_) => Err(TooLate),
        }
    }
}

async fn run(mut ops_rx: mpsc::Receiver<Op>, mut queries_rx: mpsc::Receiver<Query>) {
    let mut state = StoreState::new();
    loop {
        tokio::select! {
            op = ops_rx.recv() => match op {
                Some(op) => handle_op(&mut state, op),
                None => break,
            },
            q = queries_rx.recv() => match q {
                Some(q) => handle_query(&mut state, q),
                None => break,
            },
        }
    }
}

fn handle_op(state: &mut StoreState, op: Op) {
    if op.seqn <= state.applied {
        debug!(seqn = op.seqn, applied = state.applied, "dropping stale op");
        return;
    }
    if op.seqn == state.applied + 1 {
        apply_one(state, op.seqn, &op.mutation);
        drain_todo(state);
    } else {
        state.todo.push(Reverse((op.seqn, op.mutation)));
    }
}

fn drain_todo(state: &mut StoreState) {
    loop {
        match state.todo.peek() {
            Some(Reverse((n, _))) if *n <= state.applied => {
                state.todo.pop();
            }
            Some(Reverse((n, _))) if *n == state.applied + 1 => {
                let Reverse((n, bytes)) = state.todo.pop().expect("peeked");
                apply_one(state, n, &bytes);
            }
            _ => break,
        }
    }
}

/// Applies the op at slot `seqn`, which must equal `state.applied + 1`
/// unless it decodes to an accepted snapshot (snapshots can jump `applied`
/// forward past `seqn` itself).
fn apply_one(state: &mut StoreState, seqn: u64, bytes: &[u8]) {
    let event = match crate::mutation::decode(bytes) {
        Ok(crate::mutation::Mut::Snapshot { seqn: snap_seqn, .. }) if snap_seqn <= state.applied => {
            // Already caught up: drop the payload but still occupy this slot.
            state.applied = seqn;
            Event { seqn, path: String::new(), body: Vec::new(), cas: ReadCas::Missing, err: None, snapshot: state.root.clone() }
        }
        Ok(crate::mutation::Mut::Snapshot { seqn: snap_seqn, .. }) => {
            let (new_root, event) = node::apply(&state.root, seqn, bytes);
            state.root = new_root;
            state.applied = snap_seqn;
            event
        }
        _ => {
            let (new_root, event) = node::apply(&state.root, seqn, bytes);
            state.root = new_root;
            state.applied = seqn;
            event
        }
    };

    fan_out(state, &event);
    wake_syncs(state);
    wake_sync_paths(state);
    wake_waits(state, &event);
}

fn fan_out(state: &mut StoreState, event: &Event) {
    state.watches.retain(|w| {
        if !glob_match(&w.glob, &event.path) {
            return true;
        }
        match w.tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(glob = %w.glob, "watch channel closed, deregistering");
                false
            }
        }
    });
}

fn wake_syncs(state: &mut StoreState) {
    let applied = state.applied;
    let (ready, pending): (Vec<_>, Vec<_>) = state.sync_waiters.drain(..).partition(|(n, _)| *n <= applied);
    for (_, tx) in ready {
        let _ = tx.send(());
    }
    state.sync_waiters = pending;
}

fn wake_sync_paths(state: &mut StoreState) {
    let root = state.root.clone();
    let (ready, pending): (Vec<_>, Vec<_>) = state
        .sync_path_waiters
        .drain(..)
        .partition(|(path, _)| node::get(&root, path).1 != ReadCas::Missing);
    for (_, tx) in ready {
        let _ = tx.send(root.clone());
    }
    state.sync_path_waiters = pending;
}

/// Resolves every waiter the just-applied event settles: an exact match
/// gets the event itself, and anything else at or below the new watermark
/// gets `TooLate` rather than hanging forever — a snapshot-driven jump in
/// `apply_one` can advance `applied` straight past a seqn someone is still
/// waiting on, with no event of its own to match against.
fn wake_waits(state: &mut StoreState, event: &Event) {
    let seqn = event.seqn;
    let applied = state.applied;
    let mut still_pending = Vec::new();
    for (n, tx) in state.waits.drain(..) {
        if n == seqn {
            let _ = tx.send(WaitOutcome::Applied(event.clone()));
        } else if n <= applied {
            let _ = tx.send(WaitOutcome::TooLate);
        } else {
            still_pending.push((n, tx));
        }
    }
    state.waits = still_pending;
}

fn handle_query(state: &mut StoreState, q: Query) {
    match q {
        Query::Get { path, reply } => {
            let _ = reply.send(node::get(&state.root, &path));
        }
        Query::Sync { seqn, reply } => {
            if seqn <= state.applied {
                let _ = reply.send(());
            } else {
                state.sync_waiters.push((seqn, reply));
            }
        }
        Query::SyncPath { path, reply } => {
            if node::get(&state.root, &path).1 != ReadCas::Missing {
                let _ = reply.send(state.root.clone());
            } else {
                state.sync_path_waiters.push((path, reply));
            }
        }
        Query::Watch { glob, tx } => {
            state.watches.push(WatchEntry { glob, tx });
        }
        Query::GetDirAndWatch { path, tx } => {
            synthesize_dir_events(&state.root, &path, &tx);
            let glob = if path == "/" { "/**".to_string() } else { format!("{path}/**") };
            state.watches.push(WatchEntry { glob, tx });
        }
        Query::Wait { seqn, reply } => {
            if seqn <= state.applied {
                let _ = reply.send(WaitOutcome::TooLate);
            } else {
                state.waits.push((seqn, reply));
            }
        }
        Query::Applied { reply } => {
            let _ = reply.send(state.applied);
        }
    }
}

/// Walks every file reachable under `path` and sends a seqn-0 event for
/// each, so a new watcher sees the directory's current contents before any
/// live mutation. Recurses through subdirectories, matching the `path/**`
/// glob the watch is registered under right after.
fn synthesize_dir_events(root: &Arc<Node>, path: &str, tx: &mpsc::UnboundedSender<Event>) {
    let comps = crate::path::split(path);
    let mut cur = root.clone();
    for comp in &comps {
        match cur.as_ref() {
            Node::Dir(children) => match children.get(*comp) {
                Some(child) => cur = child.clone(),
                None => return,
            },
            Node::File { .. } => return,
        }
    }
    walk(root, &cur, path, tx);
}

fn walk(root: &Arc<Node>, node: &Arc<Node>, path: &str, tx: &mpsc::UnboundedSender<Event>) {
    match node.as_ref() {
        Node::File { value, cas } => {
            let event = Event {
                seqn: 0,
                path: path.to_string(),
                body: vec![String::from_utf8_lossy(value).into_owned()],
                cas: ReadCas::Seqn(*cas),
                err: None,
                snapshot: root.clone(),
            };
            if tx.send(event).is_err() {
                warn!(%path, "watch closed before initial sync completed");
            }
        }
        Node::Dir(children) => {
            for (name, child) in children {
                let child_path = if path == "/" { format!("/{name}") } else { format!("{path}/{name}") };
                walk(root, child, &child_path, tx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::Cas;
    use crate::mutation::{encode_del, encode_set};

    #[tokio::test]
    async fn out_of_order_delivery_converges_after_sync() {
        let store = Store::spawn();
        store.propose(2, encode_set("/x", Cas::Clobber, b"b")).await.unwrap();
        store.propose(1, encode_set("/x", Cas::Seqn(0), b"a")).await.unwrap();
        store.sync(2).await;

        let (body, cas) = store.get("/x").await;
        assert_eq!(body, vec!["b".to_string()]);
        assert_eq!(cas, ReadCas::Seqn(2));
    }

    #[tokio::test]
    async fn watch_sees_only_matching_paths_in_seqn_order() {
        let store = Store::spawn();
        let mut watch = store.watch("/x/*").await;

        store.propose(1, encode_set("/x/a", Cas::Clobber, b"1")).await.unwrap();
        store.propose(2, encode_set("/y", Cas::Clobber, b"skip")).await.unwrap();
        store.propose(3, encode_set("/x/b", Cas::Clobber, b"2")).await.unwrap();
        store.sync(3).await;

        let first = watch.recv().await.unwrap();
        assert_eq!(first.path, "/x/a");
        let second = watch.recv().await.unwrap();
        assert_eq!(second.path, "/x/b");
    }

    #[tokio::test]
    async fn get_dir_and_watch_replays_existing_contents_before_live_events() {
        let store = Store::spawn();
        store.propose(1, encode_set("/d/a", Cas::Clobber, b"1")).await.unwrap();
        store.sync(1).await;

        let mut watch = store.get_dir_and_watch("/d").await;
        let replayed = watch.recv().await.unwrap();
        assert_eq!(replayed.path, "/d/a");
        assert_eq!(replayed.seqn, 0);

        store.propose(2, encode_set("/d/b", Cas::Clobber, b"2")).await.unwrap();
        store.sync(2).await;
        let live = watch.recv().await.unwrap();
        assert_eq!(live.path, "/d/b");
        assert_eq!(live.seqn, 2);
    }

    #[tokio::test]
    async fn wait_on_an_already_applied_seqn_is_too_late() {
        let store = Store::spawn();
        store.propose(1, encode_del("/x", Cas::Clobber)).await.unwrap();
        store.sync(1).await;
        assert_eq!(store.wait(1).await, Err(TooLate));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_a_fresh_store() {
        let store = Store::spawn();
        store.propose(1, encode_set("/x", Cas::Clobber, b"a")).await.unwrap();
        store.sync(1).await;

        let bytes = store.snapshot().await;
        let fresh = Store::spawn();
        fresh.propose(1, bytes).await.unwrap();
        fresh.sync(1).await;

        assert_eq!(fresh.get("/x").await, store.get("/x").await);
    }
}

/// Property tests for spec.md §8's convergence invariant: any two stores
/// fed the same `(seqn, mutation)` pairs, in any delivery order, agree on
/// every path once both have caught up to the highest seqn.
#[cfg(test)]
mod proptests {
    use super::*;
    use crate::cas::Cas;
    use crate::mutation::encode_set;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn two_stores_converge_regardless_of_delivery_order(
            ops in proptest::collection::vec((0usize..3, 0usize..3), 1..8)
        ) {
            let paths = ["/a", "/b", "/c"];
            let values = ["x", "y", "z"];
            let encoded: Vec<(u64, Vec<u8>)> = ops
                .iter()
                .enumerate()
                .map(|(i, &(p, v))| ((i + 1) as u64, encode_set(paths[p], Cas::Clobber, values[v].as_bytes())))
                .collect();
            let max_seqn = encoded.len() as u64;

            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results_a, results_b) = rt.block_on(async {
                let in_order = Store::spawn();
                let reversed = Store::spawn();

                for (seqn, bytes) in &encoded {
                    in_order.propose(*seqn, bytes.clone()).await.unwrap();
                }
                for (seqn, bytes) in encoded.iter().rev() {
                    reversed.propose(*seqn, bytes.clone()).await.unwrap();
                }
                in_order.sync(max_seqn).await;
                reversed.sync(max_seqn).await;

                let mut ra = Vec::new();
                let mut rb = Vec::new();
                for p in paths {
                    ra.push(in_order.get(p).await);
                    rb.push(reversed.get(p).await);
                }
                (ra, rb)
            });

            prop_assert_eq!(results_a, results_b);
        }

        #[test]
        fn applied_advances_by_exactly_one_per_accepted_seqn(
            ops in proptest::collection::vec((0usize..3, 0usize..3), 1..8)
        ) {
            let paths = ["/a", "/b", "/c"];
            let values = ["x", "y", "z"];
            let encoded: Vec<(u64, Vec<u8>)> = ops
                .iter()
                .enumerate()
                .map(|(i, &(p, v))| ((i + 1) as u64, encode_set(paths[p], Cas::Clobber, values[v].as_bytes())))
                .collect();
            let max_seqn = encoded.len() as u64;

            let rt = tokio::runtime::Runtime::new().unwrap();
            let applied = rt.block_on(async {
                let store = Store::spawn();
                for (seqn, bytes) in &encoded {
                    store.propose(*seqn, bytes.clone()).await.unwrap();
                    // Re-deliver the same op: duplicates must not double-advance.
                    store.propose(*seqn, bytes.clone()).await.unwrap();
                }
                store.sync(max_seqn).await;
                store.applied().await
            });

            prop_assert_eq!(applied, max_seqn);
        }
    }
}
