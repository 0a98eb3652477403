//! # Error Types
//!
//! Structured error types for aea_core. Every solver, the cache and the
//! pipeline report failures through [`CalcError`]; the orchestrator groups
//! them by [`ErrorKind`] when deciding which stages may still run.
//!
//! ## Example
//!
//! ```rust
//! use aea_core::errors::{CalcError, CalcResult, ErrorKind};
//!
//! fn validate_span(l_vano: f64) -> CalcResult<()> {
//!     if l_vano <= 0.0 {
//!         return Err(CalcError::invalid_input(
//!             "L_vano",
//!             l_vano.to_string(),
//!             "Span must be positive",
//!         ));
//!     }
//!     Ok(())
//! }
//!
//! let err = validate_span(-1.0).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Config);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for aea_core operations
pub type CalcResult<T> = Result<T, CalcError>;

/// Abstract error taxonomy.
///
/// Several concrete variants share a kind; callers that only care about
/// "what class of failure" match on this instead of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or invalid configuration, surfaced before any solver runs
    Config,
    /// Upstream artifact missing and automatic recompute disabled
    Prerequisite,
    /// Feasibility loop exhausted its caps
    NoSolution,
    /// Root bracketing found no sign change
    NonConvergent,
    /// Clearance constraints cannot be met simultaneously
    GeometryInfeasible,
    /// Named cable, state, hypothesis or node not found
    MissingReference,
    /// Frame stiffness matrix is not positive definite
    SingularStiffness,
    Io,
    Cancelled,
    Internal,
}

/// Structured error type for pipeline operations.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum CalcError {
    /// An input value is invalid (out of range, wrong enum value, etc.)
    #[error("Invalid input for '{field}': {value} - {reason}")]
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    /// A required field is missing
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A cable, climatic state, hypothesis or node name is not known
    #[error("Missing reference: {kind} '{name}' not found")]
    MissingReference { kind: String, name: String },

    /// The (disposition, terna, shield) combination has no geometry recipe
    #[error("Invalid typology: disposicion={disposicion}, terna={terna}, cant_hg={cant_hg}")]
    InvalidTypology {
        disposicion: String,
        terna: String,
        cant_hg: u8,
    },

    /// A stage needs an upstream artifact that is not available
    #[error("Missing prerequisite: stage {stage} needs {upstream}")]
    MissingPrerequisite { stage: String, upstream: String },

    /// No admissible solution within the solver's caps
    #[error("No solution in {solver}: {reason}")]
    NoSolution { solver: String, reason: String },

    /// Bracketing sweep found no sign change
    #[error("Non-convergent {solver}: {reason}")]
    NonConvergent { solver: String, reason: String },

    /// Clearances cannot be satisfied simultaneously
    #[error("Geometry infeasible: {reason}")]
    GeometryInfeasible { reason: String },

    /// A hypothesis asks for a climatic state that CMC did not solve
    #[error("Climatic state '{state}' missing from CMC results for {cable_role}")]
    MissingCmcState { state: String, cable_role: String },

    /// A wind code required by a hypothesis was not tabulated
    #[error("Incomplete load catalog: wind code '{code}' not tabulated")]
    IncompleteLoadCatalog { code: String },

    /// Frame analysis system is under-constrained
    #[error("Singular stiffness matrix: {reason}")]
    SingularStiffness { reason: String },

    /// File I/O error
    #[error("File error: {operation} on '{path}' - {reason}")]
    FileError {
        operation: String,
        path: String,
        reason: String,
    },

    /// File is locked by another user/process
    #[error("File locked: '{path}' is locked by {locked_by} since {locked_at}")]
    FileLocked {
        path: String,
        locked_by: String,
        locked_at: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    /// Schema version mismatch
    #[error("Version mismatch: file version {file_version}, expected {expected_version}")]
    VersionMismatch {
        file_version: String,
        expected_version: String,
    },

    /// The run was cancelled between stages
    #[error("Cancelled before stage {stage}")]
    Cancelled { stage: String },

    /// Generic internal error (should be rare)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CalcError {
    /// Create an InvalidInput error
    pub fn invalid_input(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        CalcError::InvalidInput {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        CalcError::MissingField {
            field: field.into(),
        }
    }

    /// Create a MissingReference error
    pub fn missing_reference(kind: impl Into<String>, name: impl Into<String>) -> Self {
        CalcError::MissingReference {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn invalid_typology(disposicion: impl Into<String>, terna: impl Into<String>, cant_hg: u8) -> Self {
        CalcError::InvalidTypology {
            disposicion: disposicion.into(),
            terna: terna.into(),
            cant_hg,
        }
    }

    pub fn missing_prerequisite(stage: impl Into<String>, upstream: impl Into<String>) -> Self {
        CalcError::MissingPrerequisite {
            stage: stage.into(),
            upstream: upstream.into(),
        }
    }

    /// Create a NoSolution error
    pub fn no_solution(solver: impl Into<String>, reason: impl Into<String>) -> Self {
        CalcError::NoSolution {
            solver: solver.into(),
            reason: reason.into(),
        }
    }

    /// Create a NonConvergent error
    pub fn non_convergent(solver: impl Into<String>, reason: impl Into<String>) -> Self {
        CalcError::NonConvergent {
            solver: solver.into(),
            reason: reason.into(),
        }
    }

    pub fn geometry_infeasible(reason: impl Into<String>) -> Self {
        CalcError::GeometryInfeasible { reason: reason.into() }
    }

    pub fn missing_cmc_state(state: impl Into<String>, cable_role: impl Into<String>) -> Self {
        CalcError::MissingCmcState {
            state: state.into(),
            cable_role: cable_role.into(),
        }
    }

    pub fn incomplete_load_catalog(code: impl Into<String>) -> Self {
        CalcError::IncompleteLoadCatalog { code: code.into() }
    }

    pub fn singular_stiffness(reason: impl Into<String>) -> Self {
        CalcError::SingularStiffness { reason: reason.into() }
    }

    /// Create a FileError
    pub fn file_error(operation: impl Into<String>, path: impl Into<String>, reason: impl Into<String>) -> Self {
        CalcError::FileError {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a FileLocked error
    pub fn file_locked(path: impl Into<String>, locked_by: impl Into<String>, locked_at: impl Into<String>) -> Self {
        CalcError::FileLocked {
            path: path.into(),
            locked_by: locked_by.into(),
            locked_at: locked_at.into(),
        }
    }

    pub fn serialization(reason: impl std::fmt::Display) -> Self {
        CalcError::SerializationError {
            reason: reason.to_string(),
        }
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        CalcError::Cancelled { stage: stage.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CalcError::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error (e.g., can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CalcError::FileLocked { .. })
    }

    /// Abstract kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::InvalidInput { .. }
            | CalcError::MissingField { .. }
            | CalcError::InvalidTypology { .. } => ErrorKind::Config,
            CalcError::MissingReference { .. }
            | CalcError::MissingCmcState { .. }
            | CalcError::IncompleteLoadCatalog { .. } => ErrorKind::MissingReference,
            CalcError::MissingPrerequisite { .. } => ErrorKind::Prerequisite,
            CalcError::NoSolution { .. } => ErrorKind::NoSolution,
            CalcError::NonConvergent { .. } => ErrorKind::NonConvergent,
            CalcError::GeometryInfeasible { .. } => ErrorKind::GeometryInfeasible,
            CalcError::SingularStiffness { .. } => ErrorKind::SingularStiffness,
            CalcError::FileError { .. }
            | CalcError::FileLocked { .. }
            | CalcError::SerializationError { .. }
            | CalcError::VersionMismatch { .. } => ErrorKind::Io,
            CalcError::Cancelled { .. } => ErrorKind::Cancelled,
            CalcError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get a short error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            CalcError::InvalidInput { .. } => "INVALID_INPUT",
            CalcError::MissingField { .. } => "MISSING_FIELD",
            CalcError::MissingReference { .. } => "MISSING_REFERENCE",
            CalcError::InvalidTypology { .. } => "INVALID_TYPOLOGY",
            CalcError::MissingPrerequisite { .. } => "MISSING_PREREQUISITE",
            CalcError::NoSolution { .. } => "NO_SOLUTION",
            CalcError::NonConvergent { .. } => "NON_CONVERGENT",
            CalcError::GeometryInfeasible { .. } => "GEOMETRY_INFEASIBLE",
            CalcError::MissingCmcState { .. } => "MISSING_CMC_STATE",
            CalcError::IncompleteLoadCatalog { .. } => "INCOMPLETE_LOAD_CATALOG",
            CalcError::SingularStiffness { .. } => "SINGULAR_STIFFNESS",
            CalcError::FileError { .. } => "FILE_ERROR",
            CalcError::FileLocked { .. } => "FILE_LOCKED",
            CalcError::SerializationError { .. } => "SERIALIZATION_ERROR",
            CalcError::VersionMismatch { .. } => "VERSION_MISMATCH",
            CalcError::Cancelled { .. } => "CANCELLED",
            CalcError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for CalcError {
    fn from(err: serde_json::Error) -> Self {
        CalcError::serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = CalcError::invalid_input("L_vano", "-5.0", "Span must be positive");
        let json = serde_json::to_string(&error).unwrap();
        let roundtrip: CalcError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, roundtrip);
        assert!(json.contains("\"type\":\"InvalidInput\""));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(CalcError::missing_field("TITULO").error_code(), "MISSING_FIELD");
        assert_eq!(CalcError::missing_cmc_state("III", "conductor").error_code(), "MISSING_CMC_STATE");
        assert_eq!(CalcError::singular_stiffness("x").error_code(), "SINGULAR_STIFFNESS");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(CalcError::invalid_typology("bandera", "Doble", 2).kind(), ErrorKind::Config);
        assert_eq!(CalcError::incomplete_load_catalog("Vc_max_t").kind(), ErrorKind::MissingReference);
        assert_eq!(CalcError::missing_cmc_state("V", "guardia1").kind(), ErrorKind::MissingReference);
        assert_eq!(CalcError::no_solution("SPH", "none").kind(), ErrorKind::NoSolution);
        assert_eq!(CalcError::file_locked("a", "b", "c").kind(), ErrorKind::Io);
        assert!(CalcError::file_locked("a", "b", "c").is_recoverable());
        assert!(!CalcError::cancelled("DME").is_recoverable());
    }
}
