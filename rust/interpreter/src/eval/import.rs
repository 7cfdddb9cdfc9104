//! `/import`.
//!
//! Imports are depth-first: the imported file finishes evaluating before
//! the importing directive returns. Module content is re-parsed by the
//! configured parser and evaluated in a fresh child environment that
//! lands in the root's module-environment arena, so imported executables
//! can later see their siblings by key.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use mlld_ast::{ImportClause, ImportDirective};
use mlld_resolvers::{ContentType, ImportedContent, ResolveOptions};
use mlld_variables::{
    DataValue, ImportDescriptor, SourceDirective, SyntaxForm, Variable, VariableKind,
    VariableMetadata, VariableSource,
};

use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::eval::value;

/// `/import clause from reference`
///
/// # Errors
///
/// Resolution, approval, circular-import, parse, evaluation, and
/// binding-collision errors.
pub async fn eval_import(env: &Arc<Environment>, directive: &ImportDirective) -> MlldResult<()> {
    let root = env.root_state()?;
    let opts = ResolveOptions::import(env.file_dir(), root.config.project_root.clone());
    let imported = env
        .import_resolver()
        .resolve_import(&directive.reference, &opts)
        .await?;

    match imported.content.content_type {
        ContentType::Module => import_module(env, directive, &imported).await,
        ContentType::Data => import_data(env, directive, &imported),
        ContentType::Text => import_text(env, directive, &imported),
    }
}

async fn import_module(
    env: &Arc<Environment>,
    directive: &ImportDirective,
    imported: &ImportedContent,
) -> MlldResult<()> {
    let root = env.root_state()?;
    env.begin_import(&imported.resolved)?;

    let evaluated: MlldResult<Arc<Environment>> = async {
        let nodes = root
            .parser
            .parse(&imported.content.content, &imported.resolved)?;
        let module_dir = Path::new(&imported.resolved)
            .parent()
            .map(Path::to_path_buf);
        let module_env = env.create_child(module_dir);
        module_env.set_file_path(&imported.resolved);
        crate::eval::evaluate_document(&module_env, &nodes).await?;
        Ok(module_env)
    }
    .await;

    env.end_import(&imported.resolved);
    let module_env = evaluated?;
    let module_key = env.register_module_env(module_env.clone())?;

    match &directive.clause {
        ImportClause::Named { bindings } => {
            let exported = module_env.exported_variables();
            for binding in bindings {
                let Some(variable) = exported.get(&binding.name) else {
                    return Err(MlldError::VariableResolution {
                        name: binding.name.clone(),
                        context: format!("{} does not export it", directive.reference),
                    });
                };
                let local = binding.local_name();
                env.record_import_binding(local, &directive.reference)?;
                let bound = imported_binding(
                    local,
                    variable,
                    &directive.reference,
                    &imported.resolved,
                    &module_key,
                )?;
                env.set_variable(local, bound)?;
            }
        }
        ImportClause::Namespace { alias } => {
            env.record_import_binding(alias, &directive.reference)?;
            let namespace =
                namespace_binding(env, alias, &module_env, &directive.reference, imported, &module_key)
                    .await?;
            env.set_variable(alias, namespace)?;
        }
        ImportClause::SideEffect => {}
    }
    Ok(())
}

/// Wrap an exported variable for the importing file. Executables carry
/// the module-environment key so invocation can restore their scope.
fn imported_binding(
    local: &str,
    variable: &Variable,
    reference: &str,
    resolved: &str,
    module_key: &str,
) -> MlldResult<Variable> {
    let mut inner = variable.kind.clone();
    if let VariableKind::Executable { def } = &mut inner {
        def.module_env_key = Some(module_key.to_string());
    }
    Variable::imported(
        local,
        inner,
        ImportDescriptor {
            reference: reference.to_string(),
            resolved: resolved.to_string(),
            original_name: variable.name.clone(),
        },
    )
    .map_err(|err| MlldError::internal(err.to_string()))
}

/// Build the namespace object for `* as ns`: data members are resolved
/// eagerly; executables are flat-bound as `ns.fn` and exposed through
/// the variant map so field access selects the callable.
async fn namespace_binding(
    env: &Arc<Environment>,
    alias: &str,
    module_env: &Arc<Environment>,
    reference: &str,
    imported: &ImportedContent,
    module_key: &str,
) -> MlldResult<Variable> {
    let mut entries: IndexMap<String, DataValue> = IndexMap::new();
    let mut variants: IndexMap<String, String> = IndexMap::new();

    for (name, variable) in module_env.exported_variables() {
        if let Some(def) = variable.executable_def() {
            let dotted = format!("{alias}.{name}");
            let bound =
                imported_binding(&dotted, &variable, reference, &imported.resolved, module_key)?;
            env.set_variable(&dotted, bound)?;
            variants.insert(name.clone(), dotted);
            entries.insert(
                name.clone(),
                DataValue::evaluated(serde_json::Value::String(format!(
                    "<function({})>",
                    def.params.join(", ")
                ))),
            );
        } else {
            let resolved = value::resolve_variable_value(module_env, &variable, 0).await?;
            entries.insert(name.clone(), DataValue::evaluated(resolved.to_json()));
        }
    }

    let mut variable = Variable::object(
        alias,
        entries,
        VariableSource::new(SourceDirective::Import, SyntaxForm::Object),
    )
    .map_err(|err| MlldError::internal(err.to_string()))?;
    variable.metadata = VariableMetadata {
        provenance: Some(reference.to_string()),
        transformer_variants: if variants.is_empty() {
            None
        } else {
            Some(variants)
        },
        ..VariableMetadata::default()
    };
    Ok(variable)
}

fn import_data(
    env: &Arc<Environment>,
    directive: &ImportDirective,
    imported: &ImportedContent,
) -> MlldResult<()> {
    let decoded: serde_json::Value =
        serde_json::from_str(&imported.content.content).unwrap_or(serde_json::Value::Null);

    match &directive.clause {
        ImportClause::Named { bindings } => {
            let serde_json::Value::Object(map) = &decoded else {
                return Err(MlldError::VariableResolution {
                    name: directive.reference.clone(),
                    context: "named import from non-object data".to_string(),
                });
            };
            for binding in bindings {
                let Some(value) = map.get(&binding.name) else {
                    return Err(MlldError::VariableResolution {
                        name: binding.name.clone(),
                        context: format!("{} has no such key", directive.reference),
                    });
                };
                let local = binding.local_name();
                env.record_import_binding(local, &directive.reference)?;
                let variable = Variable::imported(
                    local,
                    VariableKind::Computed {
                        value: value.clone(),
                    },
                    descriptor_for(directive, imported, &binding.name),
                )
                .map_err(|err| MlldError::internal(err.to_string()))?;
                env.set_variable(local, variable)?;
            }
        }
        ImportClause::Namespace { alias } => {
            env.record_import_binding(alias, &directive.reference)?;
            let variable = Variable::imported(
                alias,
                VariableKind::Computed { value: decoded },
                descriptor_for(directive, imported, alias),
            )
            .map_err(|err| MlldError::internal(err.to_string()))?;
            env.set_variable(alias, variable)?;
        }
        ImportClause::SideEffect => {}
    }
    Ok(())
}

fn import_text(
    env: &Arc<Environment>,
    directive: &ImportDirective,
    imported: &ImportedContent,
) -> MlldResult<()> {
    let bind = |env: &Arc<Environment>, name: &str| -> MlldResult<()> {
        env.record_import_binding(name, &directive.reference)?;
        let variable = Variable::imported(
            name,
            VariableKind::SimpleText {
                text: imported.content.content.clone(),
            },
            descriptor_for(directive, imported, name),
        )
        .map_err(|err| MlldError::internal(err.to_string()))?;
        env.set_variable(name, variable)
    };

    match &directive.clause {
        ImportClause::Named { bindings } => {
            for binding in bindings {
                bind(env, binding.local_name())?;
            }
            Ok(())
        }
        ImportClause::Namespace { alias } => bind(env, alias),
        ImportClause::SideEffect => Ok(()),
    }
}

fn descriptor_for(
    directive: &ImportDirective,
    imported: &ImportedContent,
    original: &str,
) -> ImportDescriptor {
    ImportDescriptor {
        reference: directive.reference.clone(),
        resolved: imported.resolved.clone(),
        original_name: original.to_string(),
    }
}
