//! The `/j/timer/**` primitive: files whose body is a firing deadline in
//! nanoseconds since the epoch. A single min-heap of pending deadlines
//! drives one sleep at a time, targeting whichever entry is due soonest;
//! on fire, the path is deleted and a tick carrying its name is emitted.
//!
//! The reference (`pkg/timer/timer_test.go`) is a rough sketch — it logs
//! events and never actually deletes the fired path. This module finishes
//! that shape, and its [`DeadlineHeap`] is reused as-is by the session
//! reaper (`session.rs`), which needs the identical "wait for whichever
//! thing expires next" structure over a different glob.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use doozer_paxos::Proposer;
use doozer_store::{Cas, Event, ReadCas, Store};

/// A deadline-ordered queue of armed paths. Rearming a path (a later `Set`
/// superseding an earlier one before it fires) bumps its generation, so a
/// stale heap entry from the earlier arm is discarded rather than firing
/// early when it's popped.
pub struct DeadlineHeap {
    heap: BinaryHeap<Reverse<(u128, u64, String)>>,
    armed: BTreeMap<String, (u64, Cas)>,
    next_gen: u64,
}

impl DeadlineHeap {
    pub fn new() -> DeadlineHeap {
        DeadlineHeap { heap: BinaryHeap::new(), armed: BTreeMap::new(), next_gen: 0 }
    }

    pub fn arm(&mut self, path: String, deadline_ns: u128, cas: Cas) {
        self.next_gen += 1;
        let gen = self.next_gen;
        self.armed.insert(path.clone(), (gen, cas));
        self.heap.push(Reverse((deadline_ns, gen, path)));
    }

    pub fn disarm(&mut self, path: &str) {
        self.armed.remove(path);
    }

    pub fn next_deadline(&self) -> Option<u128> {
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Pops every entry due by `now_ns`, dropping any whose generation no
    /// longer matches its path's current arm.
    pub fn pop_due(&mut self, now_ns: u128) -> Vec<(String, Cas)> {
        let mut due = Vec::new();
        while let Some(&Reverse((deadline, _, _))) = self.heap.peek() {
            if deadline > now_ns {
                break;
            }
            let Reverse((_, gen, path)) = self.heap.pop().expect("just peeked");
            if let Some(&(cur_gen, cas)) = self.armed.get(&path) {
                if cur_gen == gen {
                    self.armed.remove(&path);
                    due.push((path, cas));
                }
            }
        }
        due
    }
}

impl Default for DeadlineHeap {
    fn default() -> DeadlineHeap {
        DeadlineHeap::new()
    }
}

pub fn now_ns() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_nanos()
}

fn duration_until(deadline_ns: u128, now_ns: u128) -> Duration {
    if deadline_ns <= now_ns {
        Duration::ZERO
    } else {
        Duration::from_nanos((deadline_ns - now_ns).min(u128::from(u64::MAX)) as u64)
    }
}

/// A path's body is a decimal deadline; an absent/empty body is a del, and
/// disarms whatever was pending for that path.
fn arm_from_event(heap: &mut DeadlineHeap, ev: Event) {
    if ev.body.is_empty() || ev.body[0].is_empty() {
        heap.disarm(&ev.path);
        return;
    }
    let Ok(deadline_ns) = ev.body[0].parse::<u128>() else { return };
    let cas = match ev.cas {
        ReadCas::Seqn(n) => Cas::Seqn(n),
        _ => return,
    };
    heap.arm(ev.path, deadline_ns, cas);
}

/// Watches `glob` for deadline sets, deletes each path via `proposer` once
/// its deadline passes, and reports the fired path on `ticks` if given.
/// Runs until the store's watch channel closes (the store itself is gone).
pub async fn drive(store: Store, glob: &str, proposer: Proposer, ticks: Option<mpsc::Sender<String>>) {
    let mut watch = store.watch(glob).await;
    let mut heap = DeadlineHeap::new();
    loop {
        let sleep = tokio::time::sleep(match heap.next_deadline() {
            Some(deadline) => duration_until(deadline, now_ns()),
            None => Duration::from_secs(3600),
        });

        tokio::select! {
            ev = watch.recv() => match ev {
                Some(ev) => arm_from_event(&mut heap, ev),
                None => break,
            },
            _ = sleep => {
                for (path, cas) in heap.pop_due(now_ns()) {
                    tracing::debug!(%path, "timer fired");
                    proposer.propose(format!("{cas}:{path}")).await;
                    if let Some(tx) = &ticks {
                        let _ = tx.try_send(path);
                    }
                }
            }
        }
    }
}

/// Spawns the generic `/j/timer/**` primitive, returning a channel that
/// reports each path as it fires. Mirrors the reference `Timer.C`.
pub fn spawn(store: Store, proposer: Proposer) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(drive(store, "/j/timer/**", proposer, Some(tx)));
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_due_skips_a_superseded_arm() {
        let mut heap = DeadlineHeap::new();
        heap.arm("/j/timer/a".to_string(), 100, Cas::Seqn(1));
        heap.arm("/j/timer/a".to_string(), 200, Cas::Seqn(2));

        assert!(heap.pop_due(150).is_empty());
        assert_eq!(heap.pop_due(200), vec![("/j/timer/a".to_string(), Cas::Seqn(2))]);
    }

    #[test]
    fn disarm_drops_a_pending_fire() {
        let mut heap = DeadlineHeap::new();
        heap.arm("/j/timer/a".to_string(), 100, Cas::Seqn(1));
        heap.disarm("/j/timer/a");
        assert!(heap.pop_due(1000).is_empty());
    }

    #[tokio::test]
    async fn fires_a_tick_and_deletes_the_path() {
        let store = Store::spawn();
        store.propose(1, doozer_store::encode_set("/doozer/slot/0", Cas::Clobber, b"solo")).await.unwrap();
        store.sync(1).await;
        let proposer = doozer_paxos::spawn_proposer(doozer_paxos::Manager::new(
            doozer_net::NodeId("solo".into()),
            store.clone(),
            1,
        ));

        let deadline = now_ns() + 20_000_000; // 20ms out
        let seqn = proposer.propose(format!(":/j/timer/foo={deadline}")).await;
        store.sync(seqn).await;

        let mut ticks = spawn(store.clone(), proposer);
        let fired = tokio::time::timeout(Duration::from_secs(2), ticks.recv()).await;
        assert_eq!(fired.unwrap(), Some("/j/timer/foo".to_string()));

        for _ in 0..200 {
            let (_, cas) = store.get("/j/timer/foo").await;
            if cas == ReadCas::Missing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timer path was never deleted");
    }
}
