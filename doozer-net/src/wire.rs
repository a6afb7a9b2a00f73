//! The Paxos wire frame:
//!
//! ```text
//! [ uint64 seqn | uint8 kind | uint64 round | payload ... ]
//! ```
//!
//! Payload by kind: INVITE is empty, RSVP is `uint64 votedRound || string
//! value`, NOMINATE/VOTE/LEARN are each a single `string value`. Strings are
//! length-prefixed. All integers are big-endian. A frame that is too short
//! to hold its header, names an unknown kind, declares a string longer than
//! the remaining bytes, or exceeds `MAX_FRAME_LEN` is malformed; callers
//! drop it silently per the transport-error policy, they don't propagate it.

use std::fmt;

/// Frames bigger than this are assumed corrupt rather than legitimate.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const HEADER_LEN: usize = 8 + 1 + 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Kind {
    Invite = 0,
    Rsvp = 1,
    Nominate = 2,
    Vote = 3,
    Learn = 4,
}

impl Kind {
    fn from_u8(b: u8) -> Option<Kind> {
        match b {
            0 => Some(Kind::Invite),
            1 => Some(Kind::Rsvp),
            2 => Some(Kind::Nominate),
            3 => Some(Kind::Vote),
            4 => Some(Kind::Learn),
            _ => None,
        }
    }
}

/// A single Paxos protocol message, with the common `{seqn, round}` fields
/// spec.md §4.3 requires of every message. The sender id is not part of the
/// wire frame: it's supplied out of band by whatever transport delivered the
/// bytes (§4.3's RSVP/NOMINATE table names "sender-id" as a logical field,
/// not a byte on the wire).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Msg {
    Invite {
        seqn: u64,
        round: u64,
    },
    Rsvp {
        seqn: u64,
        round: u64,
        voted_round: u64,
        voted_value: Option<String>,
    },
    Nominate {
        seqn: u64,
        round: u64,
        value: String,
    },
    Vote {
        seqn: u64,
        round: u64,
        value: String,
    },
    Learn {
        seqn: u64,
        round: u64,
        value: String,
    },
}

impl Msg {
    pub fn seqn(&self) -> u64 {
        match self {
            Msg::Invite { seqn, .. }
            | Msg::Rsvp { seqn, .. }
            | Msg::Nominate { seqn, .. }
            | Msg::Vote { seqn, .. }
            | Msg::Learn { seqn, .. } => *seqn,
        }
    }

    pub fn round(&self) -> u64 {
        match self {
            Msg::Invite { round, .. }
            | Msg::Rsvp { round, .. }
            | Msg::Nominate { round, .. }
            | Msg::Vote { round, .. }
            | Msg::Learn { round, .. } => *round,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Msg::Invite { .. } => Kind::Invite,
            Msg::Rsvp { .. } => Kind::Rsvp,
            Msg::Nominate { .. } => Kind::Nominate,
            Msg::Vote { .. } => Kind::Vote,
            Msg::Learn { .. } => Kind::Learn,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.extend_from_slice(&self.seqn().to_be_bytes());
        out.push(self.kind() as u8);
        out.extend_from_slice(&self.round().to_be_bytes());
        match self {
            Msg::Invite { .. } => {}
            Msg::Rsvp {
                voted_round,
                voted_value,
                ..
            } => {
                out.extend_from_slice(&voted_round.to_be_bytes());
                put_string(&mut out, voted_value.as_deref().unwrap_or(""));
            }
            Msg::Nominate { value, .. } | Msg::Vote { value, .. } | Msg::Learn { value, .. } => {
                put_string(&mut out, value);
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Msg, WireError> {
        if buf.len() > MAX_FRAME_LEN {
            return Err(WireError::Oversized(buf.len()));
        }
        if buf.len() < HEADER_LEN {
            return Err(WireError::Undersized(buf.len()));
        }
        let seqn = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let kind = Kind::from_u8(buf[8]).ok_or(WireError::UnknownKind(buf[8]))?;
        let round = u64::from_be_bytes(buf[9..17].try_into().unwrap());
        let rest = &buf[17..];
        Ok(match kind {
            Kind::Invite => Msg::Invite { seqn, round },
            Kind::Rsvp => {
                if rest.len() < 8 {
                    return Err(WireError::Truncated);
                }
                let voted_round = u64::from_be_bytes(rest[0..8].try_into().unwrap());
                let (value, tail) = get_string(&rest[8..])?;
                if !tail.is_empty() {
                    return Err(WireError::TrailingBytes(tail.len()));
                }
                Msg::Rsvp {
                    seqn,
                    round,
                    voted_round,
                    voted_value: if value.is_empty() { None } else { Some(value) },
                }
            }
            Kind::Nominate | Kind::Vote | Kind::Learn => {
                let (value, tail) = get_string(rest)?;
                if !tail.is_empty() {
                    return Err(WireError::TrailingBytes(tail.len()));
                }
                match kind {
                    Kind::Nominate => Msg::Nominate { seqn, round, value },
                    Kind::Vote => Msg::Vote { seqn, round, value },
                    Kind::Learn => Msg::Learn { seqn, round, value },
                    Kind::Invite | Kind::Rsvp => unreachable!(),
                }
            }
        })
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn get_string(buf: &[u8]) -> Result<(String, &[u8]), WireError> {
    if buf.len() < 4 {
        return Err(WireError::Truncated);
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let rest = &buf[4..];
    if rest.len() < len {
        return Err(WireError::Truncated);
    }
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|_| WireError::BadUtf8)?
        .to_owned();
    Ok((s, &rest[len..]))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireError {
    Undersized(usize),
    Oversized(usize),
    UnknownKind(u8),
    Truncated,
    TrailingBytes(usize),
    BadUtf8,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Undersized(n) => write!(f, "frame too short to hold a header ({n} bytes)"),
            WireError::Oversized(n) => write!(f, "frame exceeds max length ({n} bytes)"),
            WireError::UnknownKind(b) => write!(f, "unknown message kind {b}"),
            WireError::Truncated => write!(f, "payload truncated"),
            WireError::TrailingBytes(n) => write!(f, "{n} unexpected trailing bytes"),
            WireError::BadUtf8 => write!(f, "value is not valid utf-8"),
        }
    }
}

impl std::error::Error for WireError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        let msgs = vec![
            Msg::Invite { seqn: 1, round: 2 },
            Msg::Rsvp {
                seqn: 1,
                round: 2,
                voted_round: 0,
                voted_value: None,
            },
            Msg::Rsvp {
                seqn: 1,
                round: 2,
                voted_round: 1,
                voted_value: Some("x".into()),
            },
            Msg::Nominate {
                seqn: 1,
                round: 2,
                value: "a=b".into(),
            },
            Msg::Vote {
                seqn: 1,
                round: 2,
                value: "".into(),
            },
            Msg::Learn {
                seqn: 1,
                round: 2,
                value: "/x/y=z".into(),
            },
        ];
        for m in msgs {
            let bytes = m.encode();
            let back = Msg::decode(&bytes).unwrap();
            assert_eq!(m, back);
        }
    }

    #[test]
    fn undersized_frame_is_dropped() {
        assert!(matches!(
            Msg::decode(&[0u8; 4]),
            Err(WireError::Undersized(4))
        ));
    }

    #[test]
    fn unknown_kind_is_dropped() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[8] = 200;
        assert!(matches!(Msg::decode(&buf), Err(WireError::UnknownKind(200))));
    }

    #[test]
    fn truncated_string_is_dropped() {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[8] = Kind::Nominate as u8;
        buf.extend_from_slice(&10u32.to_be_bytes()); // claims 10 bytes, has 0
        assert!(matches!(Msg::decode(&buf), Err(WireError::Truncated)));
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let buf = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(Msg::decode(&buf), Err(WireError::Oversized(_))));
    }
}
