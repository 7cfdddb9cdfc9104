//! Runtime errors.
//!
//! Typed kinds, not strings. Resolution-layer errors surface to the
//! directive evaluator unchanged; the evaluator annotates them with the
//! current file and source span and re-throws. Only `/guard` and
//! `when denied` clauses rewrite outcomes, and guard denial itself is an
//! outcome rather than an error.

use mlld_ast::Span;
use serde::ser::SerializeMap;

/// Errors raised during evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MlldError {
    /// Lookup miss or resolution-depth exhaustion.
    #[error("cannot resolve variable @{name}: {context}")]
    VariableResolution { name: String, context: String },

    /// Redefinition of an existing or reserved identifier.
    #[error("cannot bind @{name}: the name is already defined or reserved")]
    VariableRedefinition { name: String, reserved: bool },

    /// A mutation hit an immutable binding.
    #[error("variable @{name} is immutable")]
    ImmutableViolation { name: String },

    /// Missing field, out-of-bounds index, or access on a non-container.
    #[error("cannot access {field} on {base} (chain: {chain})")]
    FieldAccess {
        base: String,
        chain: String,
        field: String,
    },

    /// Path policy violation.
    #[error(transparent)]
    PathValidation(mlld_security::PathValidationError),

    /// The import stack already contains the target.
    #[error("circular import detected: {chain}")]
    CircularImport { chain: String },

    /// Two imports bound the same name in one file.
    #[error("import binding @{name} collides with an earlier import from {previous}")]
    ImportCollision { name: String, previous: String },

    /// The approval gate rejected imported content.
    #[error("import of {reference} was not approved: {reason}")]
    ImportApproval { reference: String, reason: String },

    /// Non-zero exit, timeout, or spawn failure.
    #[error("command failed ({exit_code}): {command}")]
    CommandExecution {
        command: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    },

    /// Embedded-code environment construction or invocation failure.
    #[error("shadow environment error ({lang}): {message}")]
    ShadowEnvironment { lang: String, message: String },

    /// Resolution-layer failure (no resolver, fetch, I/O).
    #[error(transparent)]
    Resolver(mlld_resolvers::ResolverError),

    /// A pipeline stage exhausted its retry budget.
    #[error("pipeline stage {stage} exceeded {max} retries")]
    RetriesExhausted { stage: String, max: u32 },

    /// Broken invariants: unbalanced stacks, unknown node types. Always
    /// fatal.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// An error annotated with the file and span it arose at.
    #[error("{file}:{span}: {source}")]
    Annotated {
        file: String,
        span: Span,
        #[source]
        source: Box<MlldError>,
    },
}

impl MlldError {
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Annotate with a source location, unless already annotated.
    #[must_use]
    pub fn at(self, file: impl Into<String>, span: Span) -> Self {
        match self {
            Self::Annotated { .. } => self,
            other => Self::Annotated {
                file: file.into(),
                span,
                source: Box::new(other),
            },
        }
    }

    /// The error with any location annotation stripped.
    #[must_use]
    pub fn root_kind(&self) -> &MlldError {
        match self {
            Self::Annotated { source, .. } => source.root_kind(),
            other => other,
        }
    }

    /// Whether this error must abort evaluation regardless of guards.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.root_kind(), Self::Internal { .. })
    }

    /// A unique error code string for this kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self.root_kind() {
            Self::VariableResolution { .. } => "VARIABLE_RESOLUTION",
            Self::VariableRedefinition { .. } => "VARIABLE_REDEFINITION",
            Self::ImmutableViolation { .. } => "IMMUTABLE_VIOLATION",
            Self::FieldAccess { .. } => "FIELD_ACCESS",
            Self::PathValidation(_) => "PATH_VALIDATION",
            Self::CircularImport { .. } => "CIRCULAR_IMPORT",
            Self::ImportCollision { .. } => "IMPORT_COLLISION",
            Self::ImportApproval { .. } => "IMPORT_APPROVAL",
            Self::CommandExecution { .. } => "COMMAND_EXECUTION",
            Self::ShadowEnvironment { .. } => "SHADOW_ENVIRONMENT",
            Self::Resolver(_) => "RESOLVER",
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            Self::Internal { .. } => "INTERNAL",
            Self::Annotated { .. } => "ANNOTATED",
        }
    }
}

impl From<mlld_resolvers::ResolverError> for MlldError {
    fn from(err: mlld_resolvers::ResolverError) -> Self {
        match err {
            mlld_resolvers::ResolverError::CircularImport { chain } => {
                Self::CircularImport { chain }
            }
            mlld_resolvers::ResolverError::ImportApproval { reference, reason } => {
                Self::ImportApproval { reference, reason }
            }
            mlld_resolvers::ResolverError::PathValidation(err) => Self::PathValidation(err),
            other => Self::Resolver(other),
        }
    }
}

impl From<mlld_security::PathValidationError> for MlldError {
    fn from(err: mlld_security::PathValidationError) -> Self {
        Self::PathValidation(err)
    }
}

impl serde::Serialize for MlldError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("code", self.code())?;
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}

/// A command failure deferred by `collect_errors: true` so the document
/// can continue.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CollectedError {
    pub command: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// A `Result` alias using [`MlldError`].
pub type MlldResult<T> = Result<T, MlldError>;

#[cfg(test)]
mod tests {
    use mlld_ast::{Position, Span};

    use super::*;

    #[test]
    fn annotation_wraps_once() {
        let span = Span::new(Position::new(3, 1, 40), Position::new(3, 10, 49));
        let err = MlldError::VariableResolution {
            name: "missing".into(),
            context: "lookup".into(),
        }
        .at("doc.mld", span)
        .at("other.mld", Span::default());

        match &err {
            MlldError::Annotated { file, .. } => assert_eq!(file, "doc.mld"),
            other => panic!("expected annotation, got {other:?}"),
        }
        assert_eq!(err.code(), "VARIABLE_RESOLUTION");
        assert!(err.to_string().contains("doc.mld:3:1"));
    }

    #[test]
    fn only_internal_is_fatal() {
        assert!(MlldError::internal("unbalanced stack").is_fatal());
        assert!(
            !MlldError::CircularImport {
                chain: "a -> b -> a".into()
            }
            .is_fatal()
        );
    }
}
