//! The evaluation environment.
//!
//! An [`Environment`] is one scope in a tree: it owns the variable map,
//! the shadow tables, the security runtime, and the per-scope import and
//! interpolation stacks. Singletons (resolver manager, config, caches,
//! executors, the module-environment arena) live in [`RootState`] on the
//! root node only; children reach them through the parent chain. The
//! effect handler and ambient context manager are shared instances, not
//! copies.

mod reserved;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use indexmap::IndexMap;
use mlld_ast::Node;
use mlld_cache::{ContentCache, ResolverVariableCache, UrlCache};
use mlld_resolvers::{
    FileSystem, HttpFetcher, ImportResolver, PrefixConfig, ResolutionContext, ResolveOptions,
    ResolverManager, TokioFileSystem, UrlFetcher,
};
use mlld_security::{
    ApprovalGate, ApproveAll, CapabilityContext, DescriptorStack, SecurityDescriptor, TaintTracker,
};
use mlld_variables::{Variable, VariableMetadata};

use crate::config::ProjectConfig;
use crate::context::{ContextManager, OpContext};
use crate::effects::{Effect, EffectHandler, EffectKind, NoOpEffectHandler, StreamBridge};
use crate::error::{CollectedError, MlldError, MlldResult};
use crate::exec::{
    CodeExecutor, CodeParams, CommandExecutor, ExecOptions, ExecResult, NodeCodeExecutor,
    ProcessCommandExecutor,
};
use crate::parser::{ModuleParser, UnconfiguredParser};
use crate::pipeline::GuardRegistry;
use crate::shadow::ShadowEnvironments;

/// Everything needed to build a root environment. Field defaults are the
/// production collaborators; tests swap in memory-backed ones.
pub struct EnvironmentOptions {
    pub config: ProjectConfig,
    pub effects: Arc<dyn EffectHandler>,
    pub fs: Arc<dyn FileSystem>,
    pub fetcher: Arc<dyn UrlFetcher>,
    pub gate: Arc<dyn ApprovalGate>,
    pub command_executor: Arc<dyn CommandExecutor>,
    pub code_executor: Arc<dyn CodeExecutor>,
    pub parser: Arc<dyn ModuleParser>,
    pub stdin: Option<String>,
}

impl EnvironmentOptions {
    #[must_use]
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            config,
            effects: Arc::new(NoOpEffectHandler),
            fs: Arc::new(TokioFileSystem),
            fetcher: Arc::new(HttpFetcher::new()),
            // Absent security manager degrades to the legacy gate.
            gate: Arc::new(ApproveAll),
            command_executor: Arc::new(ProcessCommandExecutor),
            code_executor: Arc::new(NodeCodeExecutor::default()),
            parser: Arc::new(UnconfiguredParser),
            stdin: None,
        }
    }
}

impl std::fmt::Debug for EnvironmentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentOptions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Root-only singletons.
pub struct RootState {
    pub config: ProjectConfig,
    pub resolver_manager: Arc<ResolverManager>,
    pub source_cache: Arc<ContentCache>,
    pub url_cache: Arc<UrlCache>,
    pub stdin: Option<String>,
    pub fs: Arc<dyn FileSystem>,
    pub command_executor: Arc<dyn CommandExecutor>,
    pub code_executor: Arc<dyn CodeExecutor>,
    pub parser: Arc<dyn ModuleParser>,
    /// Names the runtime owns; `/var` cannot bind them.
    pub reserved_names: HashSet<String>,
    /// Arena of module environments, keyed by identifier so executables
    /// can hold a key instead of a cyclic reference.
    module_envs: RwLock<HashMap<String, Arc<Environment>>>,
    module_env_counter: AtomicU64,
    /// Command failures deferred by `collect_errors`.
    collected_errors: Mutex<Vec<CollectedError>>,
}

impl std::fmt::Debug for RootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootState")
            .field("config", &self.config)
            .field("reserved_names", &self.reserved_names.len())
            .finish_non_exhaustive()
    }
}

/// Per-scope toggles.
#[derive(Debug, Clone, Default)]
pub struct EnvFlags {
    pub approve_all_imports: bool,
    pub allow_absolute: bool,
    /// The `<>` placeholder target inside `/for` bodies.
    pub current_iteration_file: Option<String>,
}

/// Taint tracker + descriptor stack for one scope.
#[derive(Debug, Default)]
pub struct SecurityRuntime {
    pub taint: TaintTracker,
    pub descriptors: DescriptorStack,
}

/// One scope in the environment tree.
pub struct Environment {
    variables: RwLock<IndexMap<String, Arc<Variable>>>,
    /// Key into the root's module-environment arena; set when invoking an
    /// imported executable so it sees its sibling functions.
    module_env_key: RwLock<Option<String>>,
    export_manifest: RwLock<Option<Vec<String>>>,
    /// Local import bindings: name → source reference, for collision
    /// detection.
    import_bindings: RwLock<HashMap<String, String>>,
    shadow: RwLock<ShadowEnvironments>,

    file_path: RwLock<Option<String>>,
    file_dir: RwLock<PathBuf>,
    exec_dir: PathBuf,

    parent: Option<Weak<Environment>>,
    children: Mutex<Vec<Arc<Environment>>>,

    flags: RwLock<EnvFlags>,
    interpolation_stack: Mutex<Vec<String>>,
    resolution_stack: Mutex<Vec<String>>,

    security: Mutex<SecurityRuntime>,

    /// Shared ambient context (operation/pipeline/guard/denial stacks).
    context: Arc<ContextManager>,
    guards: Arc<GuardRegistry>,
    import_resolver: ImportResolver,
    effects: Arc<dyn EffectHandler>,
    stream: Arc<Mutex<StreamBridge>>,

    /// Document-level output buffer for the top-level walker.
    nodes: Mutex<Vec<Node>>,
    resolver_vars: ResolverVariableCache,

    root: Option<Arc<RootState>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variables = self.variables.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Environment")
            .field("variables", &variables.keys().collect::<Vec<_>>())
            .field("is_root", &self.root.is_some())
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Build a root environment: resolver chain, reserved names, and
    /// built-in transformer bindings are initialized exactly once here.
    #[must_use]
    pub fn root(options: EnvironmentOptions) -> Arc<Self> {
        let EnvironmentOptions {
            config,
            effects,
            fs,
            fetcher,
            gate,
            command_executor,
            code_executor,
            parser,
            stdin,
        } = options;

        let mut manager = ResolverManager::new();
        manager.set_local_modules_path(config.project_root.join(&config.local_modules_path));
        manager.register(Arc::new(mlld_resolvers::builtin::ProjectPathResolver::new(
            fs.clone(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::RegistryResolver::new(
            fetcher.clone(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::LocalResolver::new(
            fs.clone(),
            manager.local_modules_path(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::GithubResolver::new(
            fetcher.clone(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::HttpResolver::new(
            fetcher.clone(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::NowResolver));
        manager.register(Arc::new(mlld_resolvers::builtin::DebugResolver));
        manager.register(Arc::new(mlld_resolvers::builtin::InputResolver::new(
            stdin.clone(),
        )));
        manager.register(Arc::new(mlld_resolvers::builtin::BaseResolver));

        manager.register_prefix(PrefixConfig {
            prefix: "@base/".into(),
            resolver: "project-path".into(),
            base_dir: Some(config.project_root.clone()),
            reserves_identifier: true,
        });
        for entry in &config.resolver_prefixes {
            manager.register_prefix(PrefixConfig {
                prefix: entry.prefix.clone(),
                resolver: entry.resolver.clone(),
                base_dir: entry.base_dir.clone(),
                reserves_identifier: true,
            });
        }

        let reserved_names = reserved::reserved_names(&manager);
        let manager = Arc::new(manager);

        let source_cache = Arc::new(ContentCache::new());
        let url_cache = Arc::new(UrlCache::new());
        let import_resolver = ImportResolver::new(
            manager.clone(),
            source_cache.clone(),
            url_cache.clone(),
            fetcher,
            fs.clone(),
            gate,
            config.project_root.clone(),
        );
        import_resolver.set_allow_absolute(config.allow_absolute_paths);

        let root_state = Arc::new(RootState {
            resolver_manager: manager,
            source_cache,
            url_cache,
            stdin,
            fs,
            command_executor,
            code_executor,
            parser,
            reserved_names,
            module_envs: RwLock::new(HashMap::new()),
            module_env_counter: AtomicU64::new(0),
            collected_errors: Mutex::new(Vec::new()),
            config: config.clone(),
        });

        let env = Arc::new(Self {
            variables: RwLock::new(IndexMap::new()),
            module_env_key: RwLock::new(None),
            export_manifest: RwLock::new(None),
            import_bindings: RwLock::new(HashMap::new()),
            shadow: RwLock::new(ShadowEnvironments::new()),
            file_path: RwLock::new(None),
            file_dir: RwLock::new(config.project_root.clone()),
            exec_dir: config.project_root.clone(),
            parent: None,
            children: Mutex::new(Vec::new()),
            flags: RwLock::new(EnvFlags {
                allow_absolute: config.allow_absolute_paths,
                ..EnvFlags::default()
            }),
            interpolation_stack: Mutex::new(Vec::new()),
            resolution_stack: Mutex::new(Vec::new()),
            security: Mutex::new(SecurityRuntime::default()),
            context: Arc::new(ContextManager::new()),
            guards: Arc::new(GuardRegistry::new()),
            import_resolver,
            effects,
            stream: Arc::new(Mutex::new(StreamBridge::detached())),
            nodes: Mutex::new(Vec::new()),
            resolver_vars: ResolverVariableCache::new(),
            root: Some(root_state),
        });
        reserved::bind_transformers(&env);
        env
    }

    /// Fork a child scope. The child inherits the shadow tables, shares
    /// the effect handler and ambient context, and gets its own
    /// import-resolver child (shared import stack) and a fresh
    /// descriptor stack based at this scope's effective descriptor.
    #[must_use]
    pub fn create_child(self: &Arc<Self>, new_file_dir: Option<PathBuf>) -> Arc<Self> {
        let file_dir = new_file_dir.unwrap_or_else(|| {
            self.file_dir
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        });
        let base_descriptor = self.current_descriptor();
        let taint = {
            let security = self.security.lock().unwrap_or_else(PoisonError::into_inner);
            security.taint.clone()
        };

        let child = Arc::new(Self {
            variables: RwLock::new(IndexMap::new()),
            module_env_key: RwLock::new(None),
            export_manifest: RwLock::new(None),
            import_bindings: RwLock::new(HashMap::new()),
            shadow: RwLock::new(
                self.shadow
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            file_path: RwLock::new(
                self.file_path
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            file_dir: RwLock::new(file_dir),
            exec_dir: self.exec_dir.clone(),
            parent: Some(Arc::downgrade(self)),
            children: Mutex::new(Vec::new()),
            flags: RwLock::new(
                self.flags
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            interpolation_stack: Mutex::new(Vec::new()),
            resolution_stack: Mutex::new(Vec::new()),
            security: Mutex::new(SecurityRuntime {
                taint,
                descriptors: DescriptorStack::new(base_descriptor),
            }),
            context: self.context.clone(),
            guards: self.guards.clone(),
            import_resolver: self.import_resolver.create_child(),
            effects: self.effects.clone(),
            stream: self.stream.clone(),
            nodes: Mutex::new(Vec::new()),
            resolver_vars: ResolverVariableCache::new(),
            root: None,
        });
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child.clone());
        child
    }

    /// Merge a child's variables and document nodes into this scope.
    /// Used only for internal sub-block evaluation where no scope
    /// boundary is intended; captured module environments are not
    /// propagated.
    pub fn merge_child(&self, child: &Arc<Self>) {
        let child_vars = child
            .variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        {
            let mut variables = self
                .variables
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, variable) in child_vars {
                variables.insert(name, variable);
            }
        }
        let child_nodes: Vec<Node> = child
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(child_nodes);
        self.release_child(child);
    }

    /// Drop a child from the live set after its owning directive
    /// completes.
    pub fn release_child(&self, child: &Arc<Self>) {
        child.cleanup();
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|existing| !Arc::ptr_eq(existing, child));
    }

    // -- Singletons -------------------------------------------------------

    /// The root's singleton state, reached through the parent chain.
    ///
    /// # Errors
    ///
    /// Internal error if the root has been dropped while a child is
    /// still evaluating.
    pub fn root_state(&self) -> MlldResult<Arc<RootState>> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        let mut parent = self.parent.clone();
        while let Some(weak) = parent {
            let Some(env) = weak.upgrade() else { break };
            if let Some(root) = &env.root {
                return Ok(root.clone());
            }
            parent = env.parent.clone();
        }
        Err(MlldError::internal("environment tree has no live root"))
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    #[must_use]
    pub fn guards(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    #[must_use]
    pub fn import_resolver(&self) -> &ImportResolver {
        &self.import_resolver
    }

    #[must_use]
    pub fn effects(&self) -> &Arc<dyn EffectHandler> {
        &self.effects
    }

    // -- Variables --------------------------------------------------------

    /// Bind a variable in this scope.
    ///
    /// # Errors
    ///
    /// [`MlldError::VariableRedefinition`] when the name is reserved or
    /// already bound locally, unless the incoming variable is a
    /// parameter replacement.
    pub fn set_variable(&self, name: &str, variable: Variable) -> MlldResult<()> {
        if !variable.metadata.is_parameter {
            if self.is_reserved(name)? {
                return Err(MlldError::VariableRedefinition {
                    name: name.to_string(),
                    reserved: true,
                });
            }
            let variables = self.variables.read().unwrap_or_else(PoisonError::into_inner);
            if variables.contains_key(name) {
                return Err(MlldError::VariableRedefinition {
                    name: name.to_string(),
                    reserved: false,
                });
            }
        }
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(variable));
        Ok(())
    }

    /// Replace a local binding in place; only `+=` on mutable kinds uses
    /// this.
    ///
    /// # Errors
    ///
    /// Resolution error when the binding is missing locally; immutable
    /// violation when it is frozen.
    pub fn update_variable(&self, name: &str, variable: Variable) -> MlldResult<()> {
        let mut variables = self
            .variables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(existing) = variables.get(name) else {
            return Err(MlldError::VariableResolution {
                name: name.to_string(),
                context: "update of an unbound local variable".to_string(),
            });
        };
        if existing.metadata.immutable {
            return Err(MlldError::ImmutableViolation {
                name: name.to_string(),
            });
        }
        variables.insert(name.to_string(), Arc::new(variable));
        Ok(())
    }

    /// Direct insertion for runtime-owned bindings (reserved
    /// transformers); bypasses every check.
    pub(crate) fn bind_reserved(&self, name: &str, variable: Variable) {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(variable));
    }

    /// Bind an executable parameter, bypassing reserved and
    /// import-collision checks.
    pub fn set_parameter_variable(&self, name: &str, mut variable: Variable) {
        variable.metadata.is_parameter = true;
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(variable));
    }

    /// Look up a variable: local scope, then the captured module
    /// environment, then the parent chain.
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<Arc<Variable>> {
        if let Some(variable) = self
            .variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(variable.clone());
        }

        let module_key = self
            .module_env_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(key) = module_key
            && let Ok(root) = self.root_state()
            && let Some(module_env) = root.module_env(&key)
            && let Some(variable) = module_env
                .variables
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
        {
            return Some(variable.clone());
        }

        let mut parent = self.parent.clone();
        while let Some(weak) = parent {
            let env = weak.upgrade()?;
            if let Some(variable) = env
                .variables
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
            {
                return Some(variable.clone());
            }
            parent = env.parent.clone();
        }
        None
    }

    /// Lazily compute a reserved resolver variable (`now`, `debug`,
    /// `input`, `base`, or a configured prefix). Memoized per
    /// environment.
    ///
    /// # Errors
    ///
    /// Resolution errors from the underlying function resolver.
    pub async fn get_resolver_variable(&self, name: &str) -> MlldResult<Option<Variable>> {
        let root = self.root_state()?;
        if !root.reserved_names.contains(name) {
            return Ok(None);
        }

        if let Some(text) = self.resolver_vars.get(name) {
            let value = serde_json::from_str(&text)
                .unwrap_or(serde_json::Value::String(text));
            let variable = Variable::computed(name, value)
                .map_err(|err| MlldError::internal(err.to_string()))?;
            return Ok(Some(variable));
        }

        // Prefix identifiers expose their base directory as a read-only
        // path variable.
        if let Some(base_dir) = root.resolver_manager.prefix_base_dir(name) {
            let variable = Variable::path(
                name,
                base_dir.display().to_string(),
                false,
                true,
                mlld_variables::VariableSource::new(
                    mlld_variables::SourceDirective::Builtin,
                    mlld_variables::SyntaxForm::Literal,
                ),
            )
            .map_err(|err| MlldError::internal(err.to_string()))?;
            return Ok(Some(variable.with_metadata(VariableMetadata::reserved())));
        }

        if crate::transformers::is_transformer(name) {
            // Transformers are bound eagerly at root init.
            return Ok(self.get_variable(name).map(|v| (*v).clone()));
        }

        let opts = ResolveOptions {
            context: ResolutionContext::Variable,
            base_dir: self.file_dir(),
            project_root: root.config.project_root.clone(),
        };
        let content = root.resolver_manager.resolve(name, &opts).await?;
        self.resolver_vars.insert(name, &content.content);
        let value = match content.content_type {
            mlld_resolvers::ContentType::Data => serde_json::from_str(&content.content)
                .unwrap_or(serde_json::Value::String(content.content)),
            _ => serde_json::Value::String(content.content),
        };
        let variable = Variable::computed(name, value)
            .map_err(|err| MlldError::internal(err.to_string()))?;
        Ok(Some(variable.with_metadata(VariableMetadata::reserved())))
    }

    /// Whether a name is reserved (built-in resolvers, transformers,
    /// configured prefixes).
    ///
    /// # Errors
    ///
    /// Internal error when the root is gone.
    pub fn is_reserved(&self, name: &str) -> MlldResult<bool> {
        Ok(self.root_state()?.reserved_names.contains(name))
    }

    /// Record an import binding, failing on collision with an earlier
    /// import in the same file.
    ///
    /// # Errors
    ///
    /// [`MlldError::ImportCollision`].
    pub fn record_import_binding(&self, name: &str, source: &str) -> MlldResult<()> {
        let mut bindings = self
            .import_bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = bindings.get(name) {
            return Err(MlldError::ImportCollision {
                name: name.to_string(),
                previous: previous.clone(),
            });
        }
        bindings.insert(name.to_string(), source.to_string());
        Ok(())
    }

    // -- Module environments ----------------------------------------------

    /// Store `env` in the root arena and return its key.
    ///
    /// # Errors
    ///
    /// Internal error when the root is gone.
    pub fn register_module_env(&self, env: Arc<Environment>) -> MlldResult<String> {
        let root = self.root_state()?;
        let key = format!(
            "module-env-{}",
            root.module_env_counter.fetch_add(1, Ordering::SeqCst)
        );
        root.module_envs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), env);
        Ok(key)
    }

    /// Attach a captured module environment to this scope by key.
    pub fn attach_module_env(&self, key: impl Into<String>) {
        *self
            .module_env_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(key.into());
    }

    // -- Shadow environments ----------------------------------------------

    pub fn define_shadow(&self, lang: &str, function: crate::shadow::ShadowFunction) {
        self.shadow
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .define(lang, function);
    }

    #[must_use]
    pub fn shadow_snapshot(&self) -> ShadowEnvironments {
        self.shadow
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn merge_shadow(&self, other: &ShadowEnvironments) {
        self.shadow
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(other);
    }

    // -- Exports ----------------------------------------------------------

    pub fn record_exports(&self, names: &[String]) {
        let mut manifest = self
            .export_manifest
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match manifest.as_mut() {
            Some(existing) => existing.extend(names.iter().cloned()),
            None => *manifest = Some(names.to_vec()),
        }
    }

    #[must_use]
    pub fn export_manifest(&self) -> Option<Vec<String>> {
        self.export_manifest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Variables visible to an importer: the export manifest when
    /// present, otherwise every non-parameter local binding.
    #[must_use]
    pub fn exported_variables(&self) -> IndexMap<String, Arc<Variable>> {
        let variables = self.variables.read().unwrap_or_else(PoisonError::into_inner);
        match self.export_manifest() {
            Some(manifest) => manifest
                .iter()
                .filter_map(|name| variables.get(name).map(|v| (name.clone(), v.clone())))
                .collect(),
            None => variables
                .iter()
                .filter(|(_, v)| !v.metadata.is_parameter && !v.metadata.reserved)
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect(),
        }
    }

    // -- Effects ----------------------------------------------------------

    /// Emit an effect, stamping the current effective descriptor.
    /// `Doc` effects are suppressed while an import is evaluating.
    pub fn emit_effect(&self, mut effect: Effect) {
        if effect.kind == EffectKind::Doc && self.is_importing() {
            tracing::trace!("doc effect suppressed during import");
            return;
        }
        effect.capability = self.current_descriptor();
        self.effects.handle_effect(effect);
    }

    /// Append to the document-level output buffer.
    pub fn add_node(&self, node: Node) {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node);
    }

    #[must_use]
    pub fn document_nodes(&self) -> Vec<Node> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn stream(&self) -> &Arc<Mutex<StreamBridge>> {
        &self.stream
    }

    // -- Execution --------------------------------------------------------

    /// Run a shell command with this scope's working directory and the
    /// configured environment-variable allowlist.
    ///
    /// # Errors
    ///
    /// Spawn failures and timeouts; a non-zero exit is an `Ok` result.
    pub async fn execute_command(&self, command: &str) -> MlldResult<ExecResult> {
        let root = self.root_state()?;
        let mut opts = ExecOptions::new(self.file_dir());
        for name in &root.config.allowed_env_vars {
            if let Ok(value) = std::env::var(name) {
                opts.env.insert(name.clone(), value);
            }
        }
        root.command_executor.execute(command, &opts).await
    }

    /// Run embedded js/node code with parameter bindings. The immutable
    /// `ctx` object is synthesized from the current pipeline context;
    /// the body sees this scope's shadow table for its language.
    ///
    /// # Errors
    ///
    /// [`MlldError::ShadowEnvironment`] on executor failure.
    pub async fn execute_code(
        &self,
        lang: mlld_ast::CodeLanguage,
        source: &str,
        bindings: IndexMap<String, serde_json::Value>,
    ) -> MlldResult<serde_json::Value> {
        let root = self.root_state()?;
        let ctx = self
            .context
            .pipeline_context()
            .map_or(serde_json::Value::Null, |snapshot| snapshot.ctx_view());
        let shadow = self
            .shadow
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .table(lang.as_str());
        let params = CodeParams {
            bindings,
            ctx,
            shadow,
        };
        root.code_executor.execute(lang, source, &params).await
    }

    /// Record a deferred command failure (`collect_errors: true`).
    ///
    /// # Errors
    ///
    /// Internal error when the root is gone.
    pub fn collect_error(&self, error: CollectedError) -> MlldResult<()> {
        self.root_state()?
            .collected_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
        Ok(())
    }

    /// Deferred command failures collected so far.
    ///
    /// # Errors
    ///
    /// Internal error when the root is gone.
    pub fn collected_errors(&self) -> MlldResult<Vec<CollectedError>> {
        Ok(self
            .root_state()?
            .collected_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    // -- Security ---------------------------------------------------------

    /// Push a capability scope. Every effect, executable invocation, and
    /// import pushes exactly once and pops exactly once.
    pub fn push_security_context(&self, context: CapabilityContext) {
        self.security
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptors
            .push(context);
    }

    /// Pop the current capability scope.
    ///
    /// # Errors
    ///
    /// An unbalanced pop is a programmer error and is fatal.
    pub fn pop_security_context(&self) -> MlldResult<CapabilityContext> {
        self.security
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptors
            .pop()
            .ok_or_else(|| MlldError::internal("unbalanced security context pop"))
    }

    /// The effective descriptor for this scope.
    #[must_use]
    pub fn current_descriptor(&self) -> SecurityDescriptor {
        self.security
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .descriptors
            .effective()
    }

    /// Run `f` against the scope's taint tracker.
    pub fn with_taint<T>(&self, f: impl FnOnce(&mut TaintTracker) -> T) -> T {
        let mut security = self.security.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut security.taint)
    }

    // -- Import guards ----------------------------------------------------

    /// Whether any import is currently evaluating (shared stack).
    #[must_use]
    pub fn is_importing(&self) -> bool {
        self.import_resolver.import_depth() > 0
    }

    /// Push `path` onto the import stack.
    ///
    /// # Errors
    ///
    /// [`MlldError::CircularImport`] when `path` is already importing.
    pub fn begin_import(&self, path: &str) -> MlldResult<()> {
        self.import_resolver.begin_import(path).map_err(Into::into)
    }

    pub fn end_import(&self, path: &str) {
        self.import_resolver.end_import(path);
    }

    // -- Interpolation / resolution stacks --------------------------------

    #[must_use]
    pub fn is_in_interpolation_stack(&self, path: &str) -> bool {
        self.interpolation_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry == path)
    }

    pub fn push_interpolation_stack(&self, path: impl Into<String>) {
        self.interpolation_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.into());
    }

    pub fn pop_interpolation_stack(&self, path: &str) {
        let mut stack = self
            .interpolation_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = stack.iter().rposition(|entry| entry == path) {
            stack.remove(position);
        }
    }

    #[must_use]
    pub fn is_resolving(&self, name: &str) -> bool {
        self.resolution_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry == name)
    }

    pub fn push_resolution(&self, name: impl Into<String>) {
        self.resolution_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.into());
    }

    pub fn pop_resolution(&self, name: &str) {
        let mut stack = self
            .resolution_stack
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(position) = stack.iter().rposition(|entry| entry == name) {
            stack.remove(position);
        }
    }

    // -- Flags and location -----------------------------------------------

    #[must_use]
    pub fn file_dir(&self) -> PathBuf {
        self.file_dir
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn file_path(&self) -> Option<String> {
        self.file_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_file_path(&self, path: impl Into<String>) {
        let path = path.into();
        let dir = std::path::Path::new(&path)
            .parent()
            .map(std::path::Path::to_path_buf);
        *self
            .file_path
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(path);
        if let Some(dir) = dir {
            *self
                .file_dir
                .write()
                .unwrap_or_else(PoisonError::into_inner) = dir;
        }
    }

    pub fn set_approve_all_imports(&self, approve_all: bool) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .approve_all_imports = approve_all;
        self.import_resolver.set_approve_all(approve_all);
    }

    pub fn set_allow_absolute(&self, allow: bool) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .allow_absolute = allow;
        self.import_resolver.set_allow_absolute(allow);
    }

    #[must_use]
    pub fn current_iteration_file(&self) -> Option<String> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_iteration_file
            .clone()
    }

    pub fn set_current_iteration_file(&self, file: Option<String>) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .current_iteration_file = file;
    }

    // -- Ambient helpers --------------------------------------------------

    /// Run a future under an operation context.
    pub async fn with_op_context<T>(
        &self,
        op: OpContext,
        fut: impl Future<Output = MlldResult<T>>,
    ) -> MlldResult<T> {
        self.context.push_op(op);
        let result = fut.await;
        self.context.pop_op();
        result
    }

    /// Run a future with guard evaluation suppressed (prevents a guard
    /// body from re-triggering guards).
    pub async fn with_guard_suppression<T>(
        &self,
        fut: impl Future<Output = MlldResult<T>>,
    ) -> MlldResult<T> {
        self.context.suppress_guards();
        let result = fut.await;
        self.context.unsuppress_guards();
        result
    }

    /// Run a future under a named guard context.
    pub async fn with_guard_context<T>(
        &self,
        guard: &str,
        fut: impl Future<Output = MlldResult<T>>,
    ) -> MlldResult<T> {
        self.context.begin_guard(guard);
        let result = fut.await;
        self.context.end_guard();
        result
    }

    #[must_use]
    pub fn should_suppress_guards(&self) -> bool {
        self.context.should_suppress_guards()
    }

    // -- Cleanup ----------------------------------------------------------

    /// Tear down this scope: shadow tables, memo caches, stream bridge
    /// (root only), and every live child, recursively.
    pub fn cleanup(&self) {
        let children: Vec<Arc<Environment>> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for child in children {
            child.cleanup();
        }
        self.shadow
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.resolver_vars.clear();
        if self.root.is_some() {
            self.stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .detach();
        }
    }
}

impl RootState {
    /// Fetch a module environment from the arena.
    #[must_use]
    pub fn module_env(&self, key: &str) -> Option<Arc<Environment>> {
        self.module_envs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}
