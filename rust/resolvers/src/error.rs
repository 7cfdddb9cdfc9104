//! Resolution and import errors.

/// Errors raised by the resolver chain and the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// No resolver accepted the reference.
    #[error("no resolver accepts reference: {reference}")]
    NoResolver { reference: String },

    /// A resolver accepted the reference but failed to produce content.
    #[error("resolver {resolver} failed for {reference}: {message}")]
    ResolveFailed {
        resolver: String,
        reference: String,
        message: String,
    },

    /// The import stack already contains the target.
    #[error("circular import detected: {chain}")]
    CircularImport { chain: String },

    /// The approval gate rejected the content.
    #[error("import of {reference} was not approved: {reason}")]
    ImportApproval { reference: String, reason: String },

    /// A local file was missing and fuzzy matching found nothing usable.
    #[error("file not found: {path}")]
    NotFound { path: String },

    /// Fuzzy matching found several equally-close candidates.
    #[error("ambiguous reference {path}; candidates: {}", candidates.join(", "))]
    AmbiguousMatch {
        path: String,
        candidates: Vec<String>,
    },

    /// Path policy rejected the reference.
    #[error(transparent)]
    PathValidation(#[from] mlld_security::PathValidationError),

    /// An I/O failure reading local content.
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },

    /// A network failure fetching URL content.
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },
}

impl ResolverError {
    /// Whether this error means "try the next resolver" rather than
    /// "abort resolution".
    #[must_use]
    pub fn is_fall_through(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ResolveFailed { .. } | Self::NoResolver { .. }
        )
    }
}
