//! Statements and their moderation state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::StatementId;

/// Moderation state of a statement. Only `Active` statements take part in
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    #[default]
    Active,
    Rejected,
    Pending,
}

impl ModerationState {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for ModerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        })
    }
}

/// A statement as known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    #[serde(default)]
    pub moderation: ModerationState,
}

impl Statement {
    #[must_use]
    pub const fn new(id: StatementId, moderation: ModerationState) -> Self {
        Self { id, moderation }
    }
}
