//! The replicated tree: path validation, the mutation codec, the
//! persistent node structure, and the single-writer store engine that
//! applies ordered ops and fans out events to watchers.

mod cas;
mod error;
mod glob;
mod mutation;
mod node;
mod path;
mod store;

pub use cas::Cas;
pub use error::{StoreError, TooLate};
pub use mutation::{decode, encode_del, encode_set, encode_snapshot, Mut};
pub use node::{get, walk_matching, Event, Node, ReadCas};
pub use path::{check_path, join, split};
pub use store::{Op, Store};
