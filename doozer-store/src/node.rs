//! The persistent, structurally-shared tree. Every mutation returns a new
//! root; unmodified subtrees are shared via `Arc`, never mutated in place.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cas::Cas;
use crate::error::StoreError;
use crate::glob::glob_match;
use crate::mutation::{self, Mut};
use crate::path;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Node {
    File { value: Vec<u8>, cas: u64 },
    Dir(BTreeMap<String, Arc<Node>>),
}

impl Node {
    pub fn empty_dir() -> Arc<Node> {
        Arc::new(Node::Dir(BTreeMap::new()))
    }
}

/// The cas tag attached to a read result: `Seqn` for a file, `Dir` for a
/// directory, `Missing` for a path with nothing there.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadCas {
    Missing,
    Dir,
    Seqn(u64),
}

impl std::fmt::Display for ReadCas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadCas::Missing => write!(f, "0"),
            ReadCas::Dir => write!(f, "dir"),
            ReadCas::Seqn(n) => write!(f, "{n}"),
        }
    }
}

/// A single applied (or attempted) mutation, as observed by watchers. Carries
/// the tree exactly as it stood immediately after this event, so a consumer
/// (the lock cleaner, notably) can walk the tree consistently with the exact
/// moment this event happened rather than racing a fresh `Get`.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub seqn: u64,
    pub path: String,
    pub body: Vec<String>,
    pub cas: ReadCas,
    pub err: Option<StoreError>,
    pub snapshot: Arc<Node>,
}

impl Event {
    fn error(seqn: u64, err: StoreError, snapshot: Arc<Node>) -> Event {
        Event { seqn, path: "/store/error".to_string(), body: vec![err.to_string()], cas: ReadCas::Missing, err: Some(err), snapshot }
    }
}

/// Reads `path` out of `root`. Missing reads return a single-element body
/// of `[""]`; directory reads return sorted child names.
pub fn get(root: &Arc<Node>, path: &str) -> (Vec<String>, ReadCas) {
    match lookup(root, path) {
        None => (vec![String::new()], ReadCas::Missing),
        Some(node) => match node.as_ref() {
            Node::File { value, cas } => (vec![String::from_utf8_lossy(value).into_owned()], ReadCas::Seqn(*cas)),
            Node::Dir(children) => (children.keys().cloned().collect(), ReadCas::Dir),
        },
    }
}

/// Walks every file in `root` whose path matches `glob`, independent of any
/// live watch registration. Used to inspect a tree frozen at a particular
/// event (see `Event::snapshot`) rather than the store's current tree, e.g.
/// the lock cleaner matching `/lock/**` against the tree as it stood right
/// after a session was deleted.
pub fn walk_matching(root: &Arc<Node>, glob: &str) -> Vec<Event> {
    let mut out = Vec::new();
    collect(root, root, "/", glob, &mut out);
    out
}

fn collect(root: &Arc<Node>, node: &Arc<Node>, path: &str, glob: &str, out: &mut Vec<Event>) {
    match node.as_ref() {
        Node::File { value, cas } => {
            if glob_match(glob, path) {
                out.push(Event {
                    seqn: *cas,
                    path: path.to_string(),
                    body: vec![String::from_utf8_lossy(value).into_owned()],
                    cas: ReadCas::Seqn(*cas),
                    err: None,
                    snapshot: root.clone(),
                });
            }
        }
        Node::Dir(children) => {
            for (name, child) in children {
                let child_path = if path == "/" { format!("/{name}") } else { format!("{path}/{name}") };
                collect(root, child, &child_path, glob, out);
            }
        }
    }
}

fn lookup(root: &Arc<Node>, path: &str) -> Option<Arc<Node>> {
    let comps = path::split(path);
    let mut cur = root.clone();
    for comp in comps {
        match cur.as_ref() {
            Node::Dir(children) => cur = children.get(comp)?.clone(),
            Node::File { .. } => return None,
        }
    }
    Some(cur)
}

/// Applies the mutation encoded in `bytes` at `seqn` to `root`, returning the
/// new root and the event to fan out. On any data error the root is
/// returned unchanged (cloned `Arc`, not rebuilt) and the event carries the
/// error at the synthetic path `/store/error`; `/store/error` is never a
/// real node in the tree, only a label on the emitted event.
pub fn apply(root: &Arc<Node>, seqn: u64, bytes: &[u8]) -> (Arc<Node>, Event) {
    let m = match mutation::decode(bytes) {
        Ok(m) => m,
        Err(e) => return (root.clone(), Event::error(seqn, e, root.clone())),
    };

    match m {
        Mut::Nop => (
            root.clone(),
            Event { seqn, path: String::new(), body: Vec::new(), cas: ReadCas::Missing, err: None, snapshot: root.clone() },
        ),
        Mut::Set { path, cas, value } => match set(root, &path, cas, seqn, &value) {
            Ok(new_root) => {
                let event = Event {
                    seqn,
                    path,
                    body: vec![String::from_utf8_lossy(&value).into_owned()],
                    cas: ReadCas::Seqn(seqn),
                    err: None,
                    snapshot: new_root.clone(),
                };
                (new_root, event)
            }
            Err(e) => (root.clone(), Event::error(seqn, e, root.clone())),
        },
        Mut::Del { path, cas } => match del(root, &path, cas) {
            Ok(new_root) => {
                let event = Event { seqn, path, body: Vec::new(), cas: ReadCas::Missing, err: None, snapshot: new_root.clone() };
                (new_root, event)
            }
            Err(e) => (root.clone(), Event::error(seqn, e, root.clone())),
        },
        Mut::Snapshot { seqn: snap_seqn, tree } => {
            let decoded: Arc<Node> = match bincode::deserialize(&tree) {
                Ok(n) => Arc::new(n),
                Err(_) => return (root.clone(), Event::error(seqn, StoreError::BadMutation, root.clone())),
            };
            let event = Event {
                seqn: snap_seqn,
                path: String::new(),
                body: Vec::new(),
                cas: ReadCas::Missing,
                err: None,
                snapshot: decoded.clone(),
            };
            (decoded, event)
        }
    }
}

fn set(root: &Arc<Node>, path: &str, cas: Cas, seqn: u64, value: &[u8]) -> Result<Arc<Node>, StoreError> {
    let comps = path::split(path);
    set_rec(root, &comps, cas, seqn, value)
}

fn set_rec(node: &Arc<Node>, comps: &[&str], cas: Cas, seqn: u64, value: &[u8]) -> Result<Arc<Node>, StoreError> {
    let children = match node.as_ref() {
        Node::Dir(children) => children,
        Node::File { .. } => return Err(StoreError::NotADirectory(String::new())),
    };

    if comps.is_empty() {
        return Err(StoreError::IsADirectory(String::new()));
    }

    let (head, rest) = (comps[0], &comps[1..]);
    let mut new_children = children.clone();

    if rest.is_empty() {
        match children.get(head) {
            None => {
                cas.check_for_create()?;
            }
            Some(existing) => match existing.as_ref() {
                Node::File { cas: current, .. } => cas.check_against(*current)?,
                Node::Dir(_) => return Err(StoreError::IsADirectory(head.to_string())),
            },
        }
        new_children.insert(head.to_string(), Arc::new(Node::File { value: value.to_vec(), cas: seqn }));
    } else {
        let child = children
            .get(head)
            .cloned()
            .unwrap_or_else(Node::empty_dir);
        let new_child = set_rec(&child, rest, cas, seqn, value)?;
        new_children.insert(head.to_string(), new_child);
    }

    Ok(Arc::new(Node::Dir(new_children)))
}

fn del(root: &Arc<Node>, path: &str, cas: Cas) -> Result<Arc<Node>, StoreError> {
    let comps = path::split(path);
    if comps.is_empty() {
        return Err(StoreError::IsADirectory(String::new()));
    }
    match del_rec(root, &comps, cas)? {
        Some(new_root) => Ok(new_root),
        None => Ok(Node::empty_dir()),
    }
}

/// Returns `None` when the directory this call just edited became empty,
/// so the cascade naturally removes empty ancestor directories too.
fn del_rec(node: &Arc<Node>, comps: &[&str], cas: Cas) -> Result<Option<Arc<Node>>, StoreError> {
    let children = match node.as_ref() {
        Node::Dir(children) => children,
        Node::File { .. } => return Err(StoreError::NotADirectory(String::new())),
    };

    let (head, rest) = (comps[0], &comps[1..]);
    let mut new_children = children.clone();

    if rest.is_empty() {
        match children.get(head) {
            None => {
                cas.check_for_absent_delete()?;
                return Ok(Some(Arc::new(Node::Dir(new_children))));
            }
            Some(existing) => match existing.as_ref() {
                Node::File { cas: current, .. } => cas.check_against(*current)?,
                Node::Dir(_) => return Err(StoreError::IsADirectory(head.to_string())),
            },
        }
        new_children.remove(head);
    } else {
        let child = match children.get(head) {
            Some(c) => c,
            None => {
                cas.check_for_absent_delete()?;
                return Ok(Some(Arc::new(Node::Dir(new_children))));
            }
        };
        match del_rec(child, rest, cas)? {
            Some(new_child) => {
                new_children.insert(head.to_string(), new_child);
            }
            None => {
                new_children.remove(head);
            }
        }
    }

    if new_children.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Arc::new(Node::Dir(new_children))))
    }
}
