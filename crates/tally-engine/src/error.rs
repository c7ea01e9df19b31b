use tally_core::ConversationId;
use tally_core::error::{ComputeError, ErrorCode};

/// Failures surfaced by [`crate::Engine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("conversation closed: {0}")]
    ConversationClosed(ConversationId),

    /// Another run holds the conversation; a follow-up has been recorded.
    #[error("computation already running for {0}")]
    AlreadyRunning(ConversationId),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("ingestion channel closed")]
    IngestClosed,

    #[error("failed to spawn engine thread")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Compute(#[from] ComputeError),
}

impl EngineError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownConversation(_) => ErrorCode::UnknownConversation,
            Self::ConversationClosed(_) => ErrorCode::ConversationClosed,
            Self::AlreadyRunning(_) => ErrorCode::ComputationInFlight,
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::IngestClosed => ErrorCode::IngestChannelClosed,
            Self::Spawn(_) => ErrorCode::InternalUnexpected,
            Self::Compute(err) => err.code(),
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
