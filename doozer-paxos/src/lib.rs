//! Single-decree Paxos over the store's mutation log: a per-seqn
//! [`instance::Instance`], a sliding-window [`manager::Manager`] that owns
//! them and talks to the tree, membership derivation in [`registrar`], and
//! the join/catch-up handshake in [`join`].

pub mod instance;
pub mod join;
pub mod manager;
pub mod registrar;

pub use instance::{Instance, Outbox};
pub use join::{bootstrap_first, handle_join_request, join_cluster, JoinRequest, JoinResponse};
pub use manager::{spawn_proposer, Manager, Proposer, DEFAULT_ALPHA};
pub use registrar::{read_membership, read_membership_as_of, Membership};
