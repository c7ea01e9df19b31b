//! Events delivered by the ingestion feed.
//!
//! One JSON object per line, internally tagged by `type`:
//!
//! ```text
//! {"type":"vote","conversation":"c1","participant":1,"statement":3,"value":"agree","timestamp":1700000000}
//! {"type":"moderation","conversation":"c1","statement":3,"state":"rejected"}
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, StatementId};
use crate::model::statement::ModerationState;
use crate::model::vote::Vote;

/// A single atomic change to a conversation's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Vote(Vote),
    Moderation {
        statement: StatementId,
        state: ModerationState,
    },
}

/// An [`Event`] addressed to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub conversation: ConversationId,
    #[serde(flatten)]
    pub event: Event,
}

impl Envelope {
    #[must_use]
    pub const fn new(conversation: ConversationId, event: Event) -> Self {
        Self {
            conversation,
            event,
        }
    }

    /// Parse one line of the JSONL feed.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the line is not a valid event.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Render as one JSONL line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ParticipantId;
    use crate::model::vote::VoteValue;

    #[test]
    fn parses_vote_line() {
        let env = Envelope::from_json_line(
            r#"{"type":"vote","conversation":"c1","participant":1,"statement":3,"value":"agree","timestamp":17}"#,
        )
        .unwrap();
        assert_eq!(env.conversation.as_str(), "c1");
        assert_eq!(
            env.event,
            Event::Vote(Vote::new(ParticipantId(1), StatementId(3), VoteValue::Agree, 17))
        );
    }

    #[test]
    fn parses_numeric_vote_value() {
        let env = Envelope::from_json_line(
            r#"{"type":"vote","conversation":"c1","participant":2,"statement":3,"value":-1,"timestamp":5}"#,
        )
        .unwrap();
        match env.event {
            Event::Vote(vote) => assert_eq!(vote.value, VoteValue::Disagree),
            Event::Moderation { .. } => panic!("expected a vote"),
        }
    }

    #[test]
    fn parses_moderation_line() {
        let env = Envelope::from_json_line(
            r#"{"type":"moderation","conversation":"c1","statement":3,"state":"rejected"}"#,
        )
        .unwrap();
        assert_eq!(
            env.event,
            Event::Moderation {
                statement: StatementId(3),
                state: ModerationState::Rejected,
            }
        );
    }

    #[test]
    fn line_round_trip_keeps_fields() {
        let env = Envelope::new(
            ConversationId::new("c9"),
            Event::Vote(Vote::new(ParticipantId(4), StatementId(8), VoteValue::Pass, 99)),
        );
        let line = env.to_json_line().unwrap();
        assert!(line.contains(r#""type":"vote""#));
        assert_eq!(Envelope::from_json_line(&line).unwrap(), env);
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(Envelope::from_json_line(r#"{"type":"comment","conversation":"c1"}"#).is_err());
    }
}
