//! Path policy errors.

/// A path failed validation against the active [`ValidationContext`].
///
/// [`ValidationContext`]: crate::paths::ValidationContext
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("absolute path not allowed: {path}")]
    AbsoluteNotAllowed { path: String },

    #[error("relative path not allowed: {path}")]
    RelativeNotAllowed { path: String },

    #[error("parent traversal not allowed: {path}")]
    ParentTraversalNotAllowed { path: String },

    #[error("path {path} resolves outside {root}")]
    OutsideRoot { path: String, root: String },

    #[error("URL not allowed here: {path}")]
    UrlNotAllowed { path: String },
}
