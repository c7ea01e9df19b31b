//! Strongly typed identifiers.
//!
//! Participants and statements are numbered by the collaborator that owns
//! them; the core only relies on their total order, which drives every
//! deterministic tie-break (seeding, group labelling, ranking).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a participant (a voter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

/// Stable identifier of a statement (the thing being voted on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(pub u64);

/// Opinion group label. Dense and 0-based within one clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

/// Identifier of a conversation (deliberation session).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl GroupId {
    /// Position of this group in a dense group vector.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_numerically() {
        assert!(ParticipantId(2) < ParticipantId(10));
        assert!(StatementId(2) < StatementId(10));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ParticipantId(7)).unwrap();
        assert_eq!(json, "7");
        let conv: ConversationId = serde_json::from_str("\"town-hall\"").unwrap();
        assert_eq!(conv.as_str(), "town-hall");
    }

    #[test]
    fn display_uses_short_prefixes() {
        assert_eq!(ParticipantId(3).to_string(), "p3");
        assert_eq!(StatementId(4).to_string(), "s4");
        assert_eq!(GroupId(0).to_string(), "g0");
    }
}
