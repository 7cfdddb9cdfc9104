//! Reference resolution for the mlld runtime.
//!
//! A reference (`@scope/mod`, a relative path, a URL, a built-in name) is
//! turned into cacheable [`ResolverContent`] by a priority-ordered chain of
//! [`Resolver`]s behind a [`ResolverManager`]. The [`ImportResolver`] wraps
//! the manager with import-only semantics: the circular-import stack, the
//! approval gate, and fuzzy local matching.

pub mod content;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod import;
pub mod manager;
pub mod builtin;

pub use content::{ContentMetadata, ContentType, ResolverContent};
pub use error::ResolverError;
pub use fetch::{HttpFetcher, StaticFetcher, UrlFetcher, UrlResponse};
pub use fs::{FileSystem, MemoryFileSystem, TokioFileSystem};
pub use import::{ImportResolver, ImportedContent, UrlImportResult};
pub use manager::{
    PrefixConfig, ResolutionContext, ResolveOptions, Resolver, ResolverManager, ResolverType,
};
