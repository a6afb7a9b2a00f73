//! Node identity and the framed wire format that carries Paxos messages
//! between replicas. The actual UDP/TCP socket plumbing is out of scope:
//! this crate only owns encoding, decoding, and the per-peer send/receive
//! queues that a transport drains and fills.

mod node;
mod wire;

pub use node::{Node, NodeId};
pub use wire::{Kind, Msg, WireError};
