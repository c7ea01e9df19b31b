//! A single vote and its value.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::ids::{ParticipantId, StatementId};

/// What a participant said about a statement.
///
/// Numeric encoding used by the matrix: agree = `+1`, disagree = `-1`,
/// pass = `0`. A pass is still an observed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Agree,
    Disagree,
    Pass,
}

impl VoteValue {
    /// Numeric value used by projection.
    #[must_use]
    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Agree => 1.0,
            Self::Disagree => -1.0,
            Self::Pass => 0.0,
        }
    }

    /// Decode the `{-1, 0, 1}` wire encoding.
    #[must_use]
    pub const fn from_i8(raw: i8) -> Option<Self> {
        match raw {
            1 => Some(Self::Agree),
            -1 => Some(Self::Disagree),
            0 => Some(Self::Pass),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i8(self) -> i8 {
        match self {
            Self::Agree => 1,
            Self::Disagree => -1,
            Self::Pass => 0,
        }
    }
}

impl fmt::Display for VoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Agree => "agree",
            Self::Disagree => "disagree",
            Self::Pass => "pass",
        })
    }
}

impl FromStr for VoteValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agree" | "1" | "+1" => Ok(Self::Agree),
            "disagree" | "-1" => Ok(Self::Disagree),
            "pass" | "0" => Ok(Self::Pass),
            other => Err(format!("unknown vote value '{other}'")),
        }
    }
}

/// Accepts both the word form (`"agree"`) and the `{-1, 0, 1}` encoding.
impl<'de> Deserialize<'de> for VoteValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VoteValueVisitor;

        impl Visitor<'_> for VoteValueVisitor {
            type Value = VoteValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"agree\", \"disagree\", \"pass\" or one of -1, 0, 1")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<VoteValue, E> {
                i8::try_from(v)
                    .ok()
                    .and_then(VoteValue::from_i8)
                    .ok_or_else(|| E::custom(format!("vote value out of range: {v}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<VoteValue, E> {
                i8::try_from(v)
                    .ok()
                    .and_then(VoteValue::from_i8)
                    .ok_or_else(|| E::custom(format!("vote value out of range: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<VoteValue, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(VoteValueVisitor)
    }
}

/// One vote fact from the ingestion feed.
///
/// `timestamp` is in microseconds since the Unix epoch, as reported by the
/// collaborator that recorded the vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub participant: ParticipantId,
    pub statement: StatementId,
    pub value: VoteValue,
    pub timestamp: u64,
}

impl Vote {
    #[must_use]
    pub const fn new(
        participant: ParticipantId,
        statement: StatementId,
        value: VoteValue,
        timestamp: u64,
    ) -> Self {
        Self {
            participant,
            statement,
            value,
            timestamp,
        }
    }
}

/// A retained matrix cell: the winning vote value plus the metadata that
/// decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub value: VoteValue,
    pub timestamp: u64,
    /// Arrival order within the owning matrix.
    pub seq: u64,
}

impl Cell {
    /// Returns `true` if `self` should replace `current`.
    ///
    /// Later timestamp wins; equal timestamps fall back to arrival order, so
    /// a re-vote delivered later always wins over one delivered earlier with
    /// the same timestamp.
    #[must_use]
    pub fn supersedes(&self, current: &Self) -> bool {
        match self.timestamp.cmp(&current.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.seq > current.seq,
        }
    }
}
