use crate::error::StoreError;
use std::fmt;

/// The compare-and-swap tag carried by mutations and events. `Clobber`
/// skips the check entirely; `Missing` asserts the file must not exist;
/// `Seqn(n)` asserts the file's current cas is exactly `n`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Cas {
    Clobber,
    Missing,
    Seqn(u64),
}

impl Cas {
    pub fn to_wire(self) -> String {
        match self {
            Cas::Clobber => String::new(),
            Cas::Missing => "0".to_string(),
            Cas::Seqn(n) => n.to_string(),
        }
    }

    pub fn from_wire(s: &str) -> Result<Cas, StoreError> {
        if s.is_empty() {
            Ok(Cas::Clobber)
        } else if s == "0" {
            Ok(Cas::Missing)
        } else {
            s.parse::<u64>().map(Cas::Seqn).map_err(|_| StoreError::BadMutation)
        }
    }

    /// Checks a cas expectation against a file that does not currently exist.
    pub(crate) fn check_for_create(self) -> Result<(), StoreError> {
        match self {
            Cas::Clobber | Cas::Missing => Ok(()),
            Cas::Seqn(_) => Err(StoreError::CasMismatch),
        }
    }

    /// Checks a cas expectation against a file whose current cas is `current`.
    pub(crate) fn check_against(self, current: u64) -> Result<(), StoreError> {
        match self {
            Cas::Clobber => Ok(()),
            Cas::Missing => Err(StoreError::CasMismatch),
            Cas::Seqn(n) if n == current => Ok(()),
            Cas::Seqn(_) => Err(StoreError::CasMismatch),
        }
    }

    /// Checks a cas expectation for deleting something that isn't there at all.
    pub(crate) fn check_for_absent_delete(self) -> Result<(), StoreError> {
        match self {
            Cas::Clobber | Cas::Missing => Ok(()),
            Cas::Seqn(_) => Err(StoreError::CasMismatch),
        }
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        for c in [Cas::Clobber, Cas::Missing, Cas::Seqn(123)] {
            assert_eq!(Cas::from_wire(&c.to_wire()).unwrap(), c);
        }
    }
}
