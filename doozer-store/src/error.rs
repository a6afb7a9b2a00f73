use std::fmt;

/// The data-error class from spec.md §7: surfaced as synthetic events on
/// `/store/error`, never returned directly to a caller that isn't watching
/// or waiting. Implements `std::error::Error` by hand, in the same spirit
/// as `doozer_base::error::SimpleErr`, so it converts into `doozer_base::Error`
/// for free via that crate's blanket `From` impl.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreError {
    BadPath(String),
    BadMutation,
    CasMismatch,
    NotADirectory(String),
    IsADirectory(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::BadPath(p) => write!(f, "bad path: {p:?}"),
            StoreError::BadMutation => write!(f, "bad mutation"),
            StoreError::CasMismatch => write!(f, "cas mismatch"),
            StoreError::NotADirectory(p) => write!(f, "not a directory: {p:?}"),
            StoreError::IsADirectory(p) => write!(f, "is a directory: {p:?}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Returned once, to a caller that asked to `Wait` on a seqn that has
/// already been applied (spec.md §7, class 2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TooLate;

impl fmt::Display for TooLate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "too late: seqn already applied")
    }
}

impl std::error::Error for TooLate {}
