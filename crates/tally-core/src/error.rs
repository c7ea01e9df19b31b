use std::fmt;

/// Machine-readable error codes for collaborators and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    UnknownConversation,
    ConversationClosed,
    ComputationInFlight,
    InsufficientData,
    NumericalFault,
    IngestChannelClosed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidConfig => "E1002",
            Self::UnknownConversation => "E2001",
            Self::ConversationClosed => "E2002",
            Self::ComputationInFlight => "E2003",
            Self::InsufficientData => "E3001",
            Self::NumericalFault => "E3002",
            Self::IngestChannelClosed => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid configuration value",
            Self::UnknownConversation => "Conversation not found",
            Self::ConversationClosed => "Conversation closed",
            Self::ComputationInFlight => "Computation already running",
            Self::InsufficientData => "Insufficient data to compute",
            Self::NumericalFault => "Numerical fault during computation",
            Self::IngestChannelClosed => "Ingestion channel closed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the tally config file and retry."),
            Self::InvalidConfig => Some("Check value ranges in the tally config file."),
            Self::UnknownConversation | Self::ConversationClosed => None,
            Self::ComputationInFlight => {
                Some("A follow-up run was scheduled; read the latest state once it publishes.")
            }
            Self::InsufficientData => {
                Some("Wait for at least two participants voting on two active statements.")
            }
            Self::NumericalFault => Some("Inspect the vote feed for corrupt values; the previous revision is kept."),
            Self::IngestChannelClosed => Some("The engine was shut down; create a new engine."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Why a pipeline run produced no revision.
///
/// None of these are fatal to the process: the previous revision stays
/// published and the conversation stays dirty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    /// Fewer than two participants or two statements with votes.
    #[error("insufficient data: {participants} participants, {statements} statements (need 2 of each)")]
    InsufficientData {
        participants: usize,
        statements: usize,
    },

    /// A non-finite value appeared in a numerical stage.
    #[error("numerical fault in {stage}: {detail}")]
    NumericalFault { stage: &'static str, detail: String },

    /// Unexpected fault, e.g. a panic caught at the worker boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ComputeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InsufficientData { .. } => ErrorCode::InsufficientData,
            Self::NumericalFault { .. } => ErrorCode::NumericalFault,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::InvalidConfig,
            ErrorCode::UnknownConversation,
            ErrorCode::ConversationClosed,
            ErrorCode::ComputationInFlight,
            ErrorCode::InsufficientData,
            ErrorCode::NumericalFault,
            ErrorCode::IngestChannelClosed,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::InsufficientData.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn compute_errors_map_to_codes() {
        let err = ComputeError::InsufficientData {
            participants: 1,
            statements: 5,
        };
        assert_eq!(err.code(), ErrorCode::InsufficientData);
        assert!(err.to_string().contains("1 participants"));
        assert!(err.hint().is_some());
        assert_eq!(
            ComputeError::Internal("boom".into()).code(),
            ErrorCode::InternalUnexpected
        );
    }
}
