//! Vote and statement value types.

pub mod statement;
pub mod vote;
