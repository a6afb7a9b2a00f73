use std::collections::VecDeque;

use crate::wire::Msg;

/// Identifies a cluster member. Doozer node ids are opaque strings (the
/// reference implementation generates a random hex string at bootstrap);
/// the same string doubles as the final path component under
/// `/doozer/members/<id>`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buffers encoded bytes in and out for one local replica's view of the
/// network. Mirrors the teacher's `IOQueues`/`Node` split: a transport
/// (out of scope here) drains `outgoing` onto the wire and pushes received
/// datagrams into `incoming`; this type only knows about framing, not
/// sockets.
#[derive(Debug, Default)]
pub struct Node {
    outgoing: VecDeque<(NodeId, Vec<u8>)>,
    incoming: VecDeque<(NodeId, Vec<u8>)>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_msg(&mut self, dst: NodeId, msg: &Msg) {
        self.outgoing.push_back((dst, msg.encode()));
    }

    pub fn pop_outgoing(&mut self) -> Option<(NodeId, Vec<u8>)> {
        self.outgoing.pop_front()
    }

    pub fn recv_bytes(&mut self, src: NodeId, buf: Vec<u8>) {
        self.incoming.push_back((src, buf));
    }

    /// Decodes and returns the next incoming message, skipping (and
    /// counting) any frames that fail to decode. Malformed frames are a
    /// transport error class per spec.md §7: they are silently dropped,
    /// never surfaced as an `Err` to the caller.
    pub fn pop_incoming(&mut self) -> Option<(NodeId, Msg)> {
        while let Some((src, buf)) = self.incoming.pop_front() {
            match Msg::decode(&buf) {
                Ok(msg) => return Some((src, msg)),
                Err(e) => {
                    tracing::debug!(from = %src, error = %e, "dropping malformed paxos frame");
                    continue;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Msg;

    #[test]
    fn round_trips_through_the_queues() {
        let mut n = Node::new();
        let dst = NodeId("b".into());
        let msg = Msg::Invite { seqn: 1, round: 1 };
        n.send_msg(dst.clone(), &msg);
        let (got_dst, bytes) = n.pop_outgoing().unwrap();
        assert_eq!(got_dst, dst);

        n.recv_bytes(NodeId("a".into()), bytes);
        let (src, got) = n.pop_incoming().unwrap();
        assert_eq!(src, NodeId("a".into()));
        assert_eq!(got, msg);
    }

    #[test]
    fn malformed_frames_are_skipped_not_surfaced() {
        let mut n = Node::new();
        n.recv_bytes(NodeId("a".into()), vec![0u8; 2]);
        n.recv_bytes(NodeId("a".into()), Msg::Invite { seqn: 1, round: 1 }.encode());
        let (_, got) = n.pop_incoming().unwrap();
        assert_eq!(got, Msg::Invite { seqn: 1, round: 1 });
        assert!(n.pop_incoming().is_none());
    }
}
