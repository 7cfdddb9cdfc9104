//! Branded path types and the path validator.
//!
//! Three levels: [`RawPath`] is whatever the document said,
//! [`NormalizedAbsolutePath`] has been resolved against a working
//! directory, and [`ValidatedResourcePath`] has passed policy. Only
//! [`PathValidator::validate`] mints the validated variant; file-system
//! calls take it and nothing weaker.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PathValidationError;

/// An unvalidated path string straight from the source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawPath(String);

impl RawPath {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a URL rather than a filesystem path.
    #[must_use]
    pub fn is_url(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }
}

impl std::fmt::Display for RawPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An absolute path with `.` and `..` components resolved lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedAbsolutePath(PathBuf);

impl NormalizedAbsolutePath {
    /// Resolve `raw` against `working_dir` and collapse dot components.
    ///
    /// Purely lexical: no filesystem access, no symlink resolution.
    #[must_use]
    pub fn resolve(raw: &RawPath, working_dir: &Path) -> Self {
        let joined = if Path::new(raw.as_str()).is_absolute() {
            PathBuf::from(raw.as_str())
        } else {
            working_dir.join(raw.as_str())
        };
        Self(normalize_components(&joined))
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

fn normalize_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// A path that has passed policy validation and may be handed to I/O.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedResourcePath(PathBuf);

impl ValidatedResourcePath {
    // Only the validator mints this type.
    fn mint(path: PathBuf) -> Self {
        Self(path)
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ValidatedResourcePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Whether a validated path names a filesystem resource or a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathContentType {
    Filesystem,
    Url,
}

/// The rules a path is validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    pub working_dir: PathBuf,
    /// Allow paths that resolve outside `working_dir`.
    pub allow_external: bool,
    pub allow_absolute: bool,
    pub allow_relative: bool,
    pub allow_parent_traversal: bool,
    pub allow_urls: bool,
}

impl ValidationContext {
    /// Permissive defaults rooted at `working_dir`: relative paths and
    /// parent traversal inside the root, no absolute or external paths.
    #[must_use]
    pub fn rooted(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            allow_external: false,
            allow_absolute: false,
            allow_relative: true,
            allow_parent_traversal: true,
            allow_urls: false,
        }
    }
}

/// The result of validating a raw path.
#[derive(Debug, Clone, PartialEq)]
pub struct MlldPath {
    pub original_value: RawPath,
    pub validated_path: ValidatedResourcePath,
    pub is_absolute: bool,
    pub content_type: PathContentType,
}

/// Validates raw paths against a [`ValidationContext`].
#[derive(Debug, Clone, Default)]
pub struct PathValidator;

impl PathValidator {
    /// Validate `raw` against `ctx`, producing an [`MlldPath`].
    ///
    /// # Errors
    ///
    /// Returns [`PathValidationError`] naming the violated rule.
    pub fn validate(
        &self,
        raw: &RawPath,
        ctx: &ValidationContext,
    ) -> Result<MlldPath, PathValidationError> {
        if raw.is_url() {
            if !ctx.allow_urls {
                return Err(PathValidationError::UrlNotAllowed {
                    path: raw.to_string(),
                });
            }
            return Ok(MlldPath {
                original_value: raw.clone(),
                validated_path: ValidatedResourcePath::mint(PathBuf::from(raw.as_str())),
                is_absolute: true,
                content_type: PathContentType::Url,
            });
        }

        let is_absolute = Path::new(raw.as_str()).is_absolute();
        if is_absolute && !ctx.allow_absolute {
            return Err(PathValidationError::AbsoluteNotAllowed {
                path: raw.to_string(),
            });
        }
        if !is_absolute && !ctx.allow_relative {
            return Err(PathValidationError::RelativeNotAllowed {
                path: raw.to_string(),
            });
        }
        if !ctx.allow_parent_traversal
            && Path::new(raw.as_str())
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathValidationError::ParentTraversalNotAllowed {
                path: raw.to_string(),
            });
        }

        let normalized = NormalizedAbsolutePath::resolve(raw, &ctx.working_dir);
        if !ctx.allow_external && !normalized.as_path().starts_with(&ctx.working_dir) {
            return Err(PathValidationError::OutsideRoot {
                path: raw.to_string(),
                root: ctx.working_dir.display().to_string(),
            });
        }

        Ok(MlldPath {
            original_value: raw.clone(),
            validated_path: ValidatedResourcePath::mint(normalized.as_path().to_path_buf()),
            is_absolute,
            content_type: PathContentType::Filesystem,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ctx() -> ValidationContext {
        ValidationContext::rooted("/project")
    }

    #[test]
    fn relative_path_resolves_inside_root() {
        let validated = PathValidator
            .validate(&RawPath::new("docs/./intro.md"), &ctx())
            .expect("valid");
        assert_eq!(
            validated.validated_path.as_path(),
            Path::new("/project/docs/intro.md")
        );
        assert!(!validated.is_absolute);
        assert_eq!(validated.content_type, PathContentType::Filesystem);
    }

    #[test]
    fn traversal_escaping_root_is_rejected() {
        let err = PathValidator
            .validate(&RawPath::new("../outside.md"), &ctx())
            .expect_err("must fail");
        assert!(matches!(err, PathValidationError::OutsideRoot { .. }));
    }

    #[test]
    fn absolute_requires_permission() {
        let err = PathValidator
            .validate(&RawPath::new("/etc/passwd"), &ctx())
            .expect_err("must fail");
        assert!(matches!(err, PathValidationError::AbsoluteNotAllowed { .. }));

        let mut permissive = ctx();
        permissive.allow_absolute = true;
        permissive.allow_external = true;
        let ok = PathValidator
            .validate(&RawPath::new("/etc/passwd"), &permissive)
            .expect("valid");
        assert!(ok.is_absolute);
    }

    #[test]
    fn urls_gated_separately() {
        let err = PathValidator
            .validate(&RawPath::new("https://example.com/mod.mld"), &ctx())
            .expect_err("must fail");
        assert!(matches!(err, PathValidationError::UrlNotAllowed { .. }));

        let mut with_urls = ctx();
        with_urls.allow_urls = true;
        let ok = PathValidator
            .validate(&RawPath::new("https://example.com/mod.mld"), &with_urls)
            .expect("valid");
        assert_eq!(ok.content_type, PathContentType::Url);
    }
}
