//! Stable identifiers.
//!
//! Type and pointer ids are dense indices assigned when a schema snapshot is
//! built. Constraint ids are content-derived 16-byte values so that runtime
//! error attribution survives schema rebuilds.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Identifier of an object type within a schema snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Identifier of a pointer (property or link) within a schema snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointerId(pub u32);

/// Identifier of a mutating statement within a compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Stable identifier of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub [u8; 16]);

/// Identifier of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 16]);

impl ConstraintId {
    /// Parse a constraint id from its 32-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        parse_hex16(s).map(Self)
    }
}

impl ObjectId {
    /// Build an object id from a small integer, for fixtures.
    pub fn from_u128(n: u128) -> Self {
        Self(n.to_be_bytes())
    }

    /// Parse an object id from its 32-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        parse_hex16(s).map(Self)
    }
}

fn parse_hex16(s: &str) -> Result<[u8; 16], Error> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidId(format!("{s}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidId(format!("{s}: expected 16 bytes")))
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_id_hex() {
        let id = ConstraintId([0xab; 16]);
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(ConstraintId::from_hex(&text).unwrap(), id);
    }

    #[test]
    fn test_object_id_ordering() {
        assert!(ObjectId::from_u128(1) < ObjectId::from_u128(2));
        assert!(ObjectId::from_hex("00ff").is_err());
    }
}
