//! Built-in resolvers.

mod function;
mod github;
mod http;
mod local;
mod project_path;
mod registry;

pub use function::{BaseResolver, DebugResolver, InputResolver, NowResolver};
pub use github::GithubResolver;
pub use http::HttpResolver;
pub use local::LocalResolver;
pub use project_path::ProjectPathResolver;
pub use registry::RegistryResolver;
