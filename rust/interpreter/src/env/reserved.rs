//! Reserved-name initialization for the root environment.
//!
//! Reserved names come from three places: the built-in function
//! resolvers (`now`, `debug`, `input`, `base`), the built-in
//! transformers (and their dotted variants), and configured resolver
//! prefixes. Transformers are bound eagerly as reserved executables so
//! they are visible to lookup and field access; the pipeline engine
//! dispatches them natively and never runs their placeholder bodies.

use std::collections::HashSet;
use std::sync::Arc;

use mlld_ast::{CodeLanguage, ExeBody};
use mlld_resolvers::ResolverManager;
use mlld_variables::{SourceDirective, SyntaxForm, Variable, VariableMetadata, VariableSource};

use super::Environment;
use crate::transformers;

const FUNCTION_RESOLVERS: &[&str] = &["now", "debug", "input", "base"];

pub(super) fn reserved_names(manager: &ResolverManager) -> HashSet<String> {
    let mut names: HashSet<String> = FUNCTION_RESOLVERS
        .iter()
        .map(|name| (*name).to_string())
        .collect();
    names.extend(
        transformers::TRANSFORMER_NAMES
            .iter()
            .map(|name| (*name).to_string()),
    );
    names.extend(manager.prefix_names());
    names
}

pub(super) fn bind_transformers(env: &Arc<Environment>) {
    for name in transformers::TRANSFORMER_NAMES {
        let mut metadata = VariableMetadata::reserved();
        metadata.transformer_variants = transformers::variants_of(name);

        let source = VariableSource::new(SourceDirective::Builtin, SyntaxForm::Code);
        let body = ExeBody::Code {
            lang: CodeLanguage::Js,
            source: String::new(),
        };
        let Ok(variable) = Variable::executable(*name, vec!["input".to_string()], body, source)
        else {
            continue;
        };
        // Straight into the map; set_variable rejects reserved names.
        env.bind_reserved(name, variable.with_metadata(metadata));
    }
}
