//! Project configuration, read once at root-environment construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_local_modules() -> PathBuf {
    PathBuf::from("llm/modules")
}

/// Root-level configuration for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub project_root: PathBuf,
    #[serde(default)]
    pub allow_absolute_paths: bool,
    #[serde(default = "default_local_modules")]
    pub local_modules_path: PathBuf,
    /// Environment variables embedded code is allowed to see.
    #[serde(default)]
    pub allowed_env_vars: Vec<String>,
    /// User-configured resolver prefixes (`@corp/` etc.).
    #[serde(default)]
    pub resolver_prefixes: Vec<ResolverPrefixEntry>,
}

/// A user-configured prefix entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverPrefixEntry {
    /// Includes the trailing slash: `"@corp/"`.
    pub prefix: String,
    pub resolver: String,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}

impl ProjectConfig {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            allow_absolute_paths: false,
            local_modules_path: default_local_modules(),
            allowed_env_vars: Vec::new(),
            resolver_prefixes: Vec::new(),
        }
    }
}
