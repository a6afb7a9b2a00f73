//! The mutation codec: the textual `cas:path=value` / `cas:path` / empty
//! instruction forms from spec §4.1, plus the binary snapshot form that a
//! mutation op can also carry. Values are opaque bytes, not `str` — the
//! wire form is ASCII up to the first `=`, and arbitrary after it.

use crate::cas::Cas;
use crate::error::StoreError;

/// The byte a decoded mutation can never start with: every ASCII digit and
/// `:` are claimed by the textual forms, so a leading byte outside that
/// range means "this is a snapshot record, not an instruction."
const SNAPSHOT_MAGIC: u8 = 0xff;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Mut {
    Nop,
    Set { path: String, cas: Cas, value: Vec<u8> },
    Del { path: String, cas: Cas },
    Snapshot { seqn: u64, tree: Vec<u8> },
}

pub fn encode_set(path: &str, cas: Cas, value: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:{}=", cas, path).into_bytes();
    out.extend_from_slice(value);
    out
}

pub fn encode_del(path: &str, cas: Cas) -> Vec<u8> {
    format!("{}:{}", cas, path).into_bytes()
}

pub fn encode_snapshot(seqn: u64, tree: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + tree.len());
    out.push(SNAPSHOT_MAGIC);
    out.extend_from_slice(&seqn.to_le_bytes());
    out.extend_from_slice(tree);
    out
}

/// Decodes the raw bytes of a single mutation op. An empty slice decodes to
/// `Nop` per spec §4.1 ("Nop: the empty string"); this takes that text at
/// face value rather than special-casing it as an error.
pub fn decode(bytes: &[u8]) -> Result<Mut, StoreError> {
    if bytes.is_empty() {
        return Ok(Mut::Nop);
    }

    if bytes[0] == SNAPSHOT_MAGIC {
        if bytes.len() < 9 {
            return Err(StoreError::BadMutation);
        }
        let seqn = u64::from_le_bytes(bytes[1..9].try_into().unwrap());
        return Ok(Mut::Snapshot { seqn, tree: bytes[9..].to_vec() });
    }

    let colon = match bytes.iter().position(|&b| b == b':') {
        Some(i) => i,
        None => return Err(StoreError::BadMutation),
    };

    let cas_str = std::str::from_utf8(&bytes[..colon]).map_err(|_| StoreError::BadMutation)?;
    let cas = Cas::from_wire(cas_str)?;

    let rest = &bytes[colon + 1..];
    match rest.iter().position(|&b| b == b'=') {
        Some(eq) => {
            let path = std::str::from_utf8(&rest[..eq])
                .map_err(|_| StoreError::BadPath(String::from_utf8_lossy(&rest[..eq]).into_owned()))?
                .to_string();
            crate::path::check_path(&path)?;
            let value = rest[eq + 1..].to_vec();
            Ok(Mut::Set { path, cas, value })
        }
        None => {
            let path = std::str::from_utf8(rest)
                .map_err(|_| StoreError::BadPath(String::from_utf8_lossy(rest).into_owned()))?
                .to_string();
            crate::path::check_path(&path)?;
            Ok(Mut::Del { path, cas })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_nop() {
        assert_eq!(decode(b"").unwrap(), Mut::Nop);
    }

    #[test]
    fn decodes_set_with_clobber() {
        let bytes = encode_set("/x", Cas::Clobber, b"a");
        assert_eq!(
            decode(&bytes).unwrap(),
            Mut::Set { path: "/x".into(), cas: Cas::Clobber, value: b"a".to_vec() }
        );
    }

    #[test]
    fn value_may_contain_equals_and_spaces() {
        let bytes = encode_set("/x", Cas::Missing, b"a=b c");
        assert_eq!(
            decode(&bytes).unwrap(),
            Mut::Set { path: "/x".into(), cas: Cas::Missing, value: b"a=b c".to_vec() }
        );
    }

    #[test]
    fn decodes_del_with_seqn_cas() {
        let bytes = encode_del("/x", Cas::Seqn(7));
        assert_eq!(decode(&bytes).unwrap(), Mut::Del { path: "/x".into(), cas: Cas::Seqn(7) });
    }

    #[test]
    fn no_colon_is_bad_mutation() {
        assert_eq!(decode(b"x").unwrap_err(), StoreError::BadMutation);
    }

    #[test]
    fn colon_with_bad_path_is_bad_path() {
        assert!(matches!(decode(b":x").unwrap_err(), StoreError::BadPath(_)));
        assert!(matches!(decode(b":/x y").unwrap_err(), StoreError::BadPath(_)));
    }

    #[test]
    fn snapshot_round_trips() {
        let bytes = encode_snapshot(42, b"tree-bytes");
        assert_eq!(decode(&bytes).unwrap(), Mut::Snapshot { seqn: 42, tree: b"tree-bytes".to_vec() });
    }
}
