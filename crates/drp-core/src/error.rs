use std::fmt;

/// Machine-readable error codes shared by every error type in the crate.
///
/// `E1xxx` are structural invariant violations (bugs in caller bookkeeping),
/// `E2xxx` are per-vertex admission failures reported as missing by merge,
/// `E3xxx` are state and ACL failures, `E4xxx` are signature and finality
/// failures, and `E5xxx` are configuration problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CycleDetected,
    LcaNotFound,
    MissingState,
    UnknownVertex,
    UnknownDependency,
    NoDependencies,
    InvalidHash,
    InvalidTimestamp,
    MalformedOperation,
    PermissionDenied,
    InvalidSignature,
    MissingSignature,
    StateSerialization,
    OperationRejected,
    AclPolicyViolation,
    UnknownVoter,
    SignatureVerificationFailed,
    InvalidKey,
    UnknownFinalityState,
    InvalidConfig,
    ConfigParseError,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::CycleDetected => "E1001",
            Self::LcaNotFound => "E1002",
            Self::MissingState => "E1003",
            Self::UnknownVertex => "E1004",
            Self::UnknownDependency => "E2001",
            Self::NoDependencies => "E2002",
            Self::InvalidHash => "E2003",
            Self::InvalidTimestamp => "E2004",
            Self::MalformedOperation => "E2005",
            Self::PermissionDenied => "E2006",
            Self::InvalidSignature => "E2007",
            Self::MissingSignature => "E2008",
            Self::StateSerialization => "E3001",
            Self::OperationRejected => "E3002",
            Self::AclPolicyViolation => "E3003",
            Self::UnknownVoter => "E4001",
            Self::SignatureVerificationFailed => "E4002",
            Self::InvalidKey => "E4003",
            Self::UnknownFinalityState => "E4004",
            Self::InvalidConfig => "E5001",
            Self::ConfigParseError => "E5002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::CycleDetected => "Cycle detected in hash graph",
            Self::LcaNotFound => "Lowest common ancestor not found",
            Self::MissingState => "Cached state missing for vertex",
            Self::UnknownVertex => "Vertex not found",
            Self::UnknownDependency => "Dependency not yet known",
            Self::NoDependencies => "Vertex has no dependencies",
            Self::InvalidHash => "Vertex hash does not match content",
            Self::InvalidTimestamp => "Vertex timestamp out of order",
            Self::MalformedOperation => "Malformed operation",
            Self::PermissionDenied => "Peer lacks permission",
            Self::InvalidSignature => "Vertex signature invalid",
            Self::MissingSignature => "Vertex signature missing",
            Self::StateSerialization => "State snapshot could not be serialized",
            Self::OperationRejected => "Operation rejected by data type",
            Self::AclPolicyViolation => "ACL policy violation",
            Self::UnknownVoter => "Peer is not a finality signer for vertex",
            Self::SignatureVerificationFailed => "Signature verification failed",
            Self::InvalidKey => "Invalid key material",
            Self::UnknownFinalityState => "No finality state for vertex",
            Self::InvalidConfig => "Invalid configuration value",
            Self::ConfigParseError => "Config file parse error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::CycleDetected | Self::LcaNotFound | Self::MissingState => {
                Some("Internal bookkeeping is inconsistent. Report a bug with logs.")
            }
            Self::UnknownDependency => {
                Some("Fetch the missing dependencies from a peer and retry.")
            }
            Self::NoDependencies => Some("Every vertex except the root must name a dependency."),
            Self::InvalidHash | Self::InvalidSignature => {
                Some("Discard the vertex; it was altered after creation.")
            }
            Self::InvalidTimestamp => Some("Check the authoring peer's clock."),
            Self::PermissionDenied => Some("Ask an admin to grant the required group."),
            Self::MissingSignature => {
                Some("Sign vertices or disable `validation.require_signatures`.")
            }
            Self::InvalidConfig => Some("Use a finality threshold in (0, 1]."),
            Self::ConfigParseError => Some("Fix the TOML syntax and retry."),
            Self::UnknownVertex
            | Self::MalformedOperation
            | Self::StateSerialization
            | Self::OperationRejected
            | Self::AclPolicyViolation
            | Self::UnknownVoter
            | Self::SignatureVerificationFailed
            | Self::InvalidKey
            | Self::UnknownFinalityState => None,
        }
    }

    /// True for codes that indicate a bug rather than a recoverable condition.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::CycleDetected | Self::LcaNotFound | Self::MissingState | Self::UnknownVertex
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 21] = [
        ErrorCode::CycleDetected,
        ErrorCode::LcaNotFound,
        ErrorCode::MissingState,
        ErrorCode::UnknownVertex,
        ErrorCode::UnknownDependency,
        ErrorCode::NoDependencies,
        ErrorCode::InvalidHash,
        ErrorCode::InvalidTimestamp,
        ErrorCode::MalformedOperation,
        ErrorCode::PermissionDenied,
        ErrorCode::InvalidSignature,
        ErrorCode::MissingSignature,
        ErrorCode::StateSerialization,
        ErrorCode::OperationRejected,
        ErrorCode::AclPolicyViolation,
        ErrorCode::UnknownVoter,
        ErrorCode::SignatureVerificationFailed,
        ErrorCode::InvalidKey,
        ErrorCode::UnknownFinalityState,
        ErrorCode::InvalidConfig,
        ErrorCode::ConfigParseError,
    ];

    #[test]
    fn all_codes_are_unique() {
        let unique: HashSet<&str> = ALL.iter().map(|c| c.code()).collect();
        assert_eq!(unique.len(), ALL.len());
    }

    #[test]
    fn structural_codes_live_in_e1_range() {
        for code in ALL {
            assert_eq!(code.is_structural(), code.code().starts_with("E1"), "{code:?}");
        }
    }

    #[test]
    fn display_prints_code() {
        assert_eq!(ErrorCode::PermissionDenied.to_string(), "E2006");
        assert!(!ErrorCode::CycleDetected.message().is_empty());
    }
}
