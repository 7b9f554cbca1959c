use opmeter_shared::protocol::DecodeError;
use opmeter_shared::utils::UnknownDtypeError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to decode marker: {0}")]
    Decode(#[from] DecodeError),

    #[error("contract violation: {calculator} does not handle {module}.{operator}")]
    ContractViolation {
        calculator: &'static str,
        module: String,
        operator: String,
    },

    #[error("no calculator registered for {module}.{operator}")]
    UnknownOperator { module: String, operator: String },

    #[error(transparent)]
    UnknownDtype(#[from] UnknownDtypeError),

    #[error("invalid arguments for {module}.{operator}: {reason}")]
    InvalidArguments {
        module: String,
        operator: String,
        reason: String,
    },

    #[error("{module}.{operator} is already registered to {family}")]
    DuplicateRegistration {
        module: String,
        operator: String,
        family: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Coarse failure classes used for counting and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    ContractViolation,
    UnknownOperator,
    UnknownDtype,
    InvalidArguments,
    Registry,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::ContractViolation => "contract_violation",
            FailureKind::UnknownOperator => "unknown_operator",
            FailureKind::UnknownDtype => "unknown_dtype",
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::Registry => "registry",
        }
    }
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::Decode(_) => FailureKind::Decode,
            AnalysisError::ContractViolation { .. } => FailureKind::ContractViolation,
            AnalysisError::UnknownOperator { .. } => FailureKind::UnknownOperator,
            AnalysisError::UnknownDtype(_) => FailureKind::UnknownDtype,
            AnalysisError::InvalidArguments { .. } => FailureKind::InvalidArguments,
            AnalysisError::DuplicateRegistration { .. } => FailureKind::Registry,
        }
    }

    /// Programming errors (wiring defects) as opposed to bad input
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            AnalysisError::ContractViolation { .. } | AnalysisError::DuplicateRegistration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_display() {
        let err = AnalysisError::ContractViolation {
            calculator: "Mean",
            module: "torch".to_string(),
            operator: "sum".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "contract violation: Mean does not handle torch.sum"
        );
        assert_eq!(err.kind(), FailureKind::ContractViolation);
        assert!(err.is_defect());
    }

    #[test]
    fn test_unknown_dtype_is_transparent() {
        let err: AnalysisError = UnknownDtypeError {
            dtype: "qint8".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "unknown dtype: qint8");
        assert_eq!(err.kind(), FailureKind::UnknownDtype);
        assert!(!err.is_defect());
    }
}
