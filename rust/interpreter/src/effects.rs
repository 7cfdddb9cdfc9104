//! Effects — the runtime's only observable outputs.
//!
//! Directives never print or write directly; they emit [`Effect`]s through
//! the environment, which stamps the current security descriptor before
//! handing them to the shared [`EffectHandler`]. Handlers serialize
//! stdout/stderr, write files, and append document output in arrival
//! order.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use mlld_ast::Span;
use mlld_security::SecurityDescriptor;
use serde::{Deserialize, Serialize};

/// Where an effect is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    /// Append to the rendered document.
    Doc,
    Stdout,
    Stderr,
    /// Both stdout and the document.
    Both,
    /// Write to a file.
    File,
}

/// How a file effect writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Append,
    Overwrite,
}

/// One observable side-output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Effect {
    pub kind: EffectKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Source span of the emitting node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Span>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<FileMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// The effective security descriptor at emission time; stamped by the
    /// environment, not by callers.
    pub capability: SecurityDescriptor,
}

impl Effect {
    #[must_use]
    pub fn doc(content: impl Into<String>) -> Self {
        Self::new(EffectKind::Doc, content)
    }

    #[must_use]
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new(EffectKind::Stdout, content)
    }

    #[must_use]
    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new(EffectKind::Stderr, content)
    }

    #[must_use]
    pub fn file(path: impl Into<PathBuf>, content: impl Into<String>, mode: FileMode) -> Self {
        let mut effect = Self::new(EffectKind::File, content);
        effect.path = Some(path.into());
        effect.mode = Some(mode);
        effect
    }

    fn new(kind: EffectKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            path: None,
            source: None,
            mode: None,
            metadata: None,
            capability: SecurityDescriptor::default(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, span: Span) -> Self {
        self.source = Some(span);
        self
    }
}

/// Receives effects in emission order.
///
/// One handler instance is shared by a root environment and all of its
/// descendants; emission is synchronous and single-threaded.
pub trait EffectHandler: Send + Sync {
    fn handle_effect(&self, effect: Effect);
}

/// Discards every effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEffectHandler;

impl EffectHandler for NoOpEffectHandler {
    fn handle_effect(&self, _effect: Effect) {
        // Discard
    }
}

/// Collects effects in memory. The default for tests and for rendering a
/// document after evaluation.
pub struct CollectingEffectHandler {
    effects: Mutex<Vec<Effect>>,
}

impl CollectingEffectHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            effects: Mutex::new(Vec::new()),
        }
    }

    /// All effects in arrival order.
    #[must_use]
    pub fn effects(&self) -> Vec<Effect> {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The rendered document: `Doc` and `Both` content concatenated in
    /// arrival order.
    #[must_use]
    pub fn document(&self) -> String {
        self.effects()
            .iter()
            .filter(|e| matches!(e.kind, EffectKind::Doc | EffectKind::Both))
            .map(|e| e.content.as_str())
            .collect()
    }

    /// Stdout content in arrival order.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.effects()
            .iter()
            .filter(|e| matches!(e.kind, EffectKind::Stdout | EffectKind::Both))
            .map(|e| e.content.as_str())
            .collect()
    }
}

impl Default for CollectingEffectHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CollectingEffectHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectingEffectHandler")
            .field("count", &self.effects().len())
            .finish()
    }
}

impl EffectHandler for CollectingEffectHandler {
    fn handle_effect(&self, effect: Effect) {
        self.effects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(effect);
    }
}

/// Broadcasts each effect to several handlers.
pub struct BroadcastEffectHandler {
    handlers: Vec<Box<dyn EffectHandler>>,
}

impl BroadcastEffectHandler {
    #[must_use]
    pub fn new(handlers: Vec<Box<dyn EffectHandler>>) -> Self {
        Self { handlers }
    }
}

impl std::fmt::Debug for BroadcastEffectHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEffectHandler")
            .field("count", &self.handlers.len())
            .finish()
    }
}

impl EffectHandler for BroadcastEffectHandler {
    fn handle_effect(&self, effect: Effect) {
        for handler in &self.handlers {
            handler.handle_effect(effect.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Events bridged from pipeline stage execution onto the stream bus.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk { stage: String, content: String },
    Progress { stage: String, stage_index: usize },
    CommandStart { command: String },
    CommandComplete { command: String, exit_code: i32 },
}

impl StreamEvent {
    /// The visibility category a filter checks.
    #[must_use]
    pub fn category(&self) -> StreamCategory {
        match self {
            Self::Chunk { .. } => StreamCategory::Content,
            Self::Progress { .. } => StreamCategory::Metadata,
            Self::CommandStart { .. } | Self::CommandComplete { .. } => StreamCategory::Tools,
        }
    }
}

/// Coarse event categories gated by visibility flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCategory {
    Content,
    Tools,
    Metadata,
}

/// Receives stream events.
pub trait StreamEmitter: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

/// Which stream event categories reach the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamVisibility {
    pub show_thinking: bool,
    pub show_tools: bool,
    pub show_metadata: bool,
    pub show_all: bool,
    /// Disables the bridge entirely.
    pub no_stream: bool,
}

impl StreamVisibility {
    #[must_use]
    pub fn allows(&self, category: StreamCategory) -> bool {
        if self.no_stream {
            return false;
        }
        if self.show_all {
            return true;
        }
        match category {
            StreamCategory::Content => true,
            StreamCategory::Tools => self.show_tools,
            StreamCategory::Metadata => self.show_metadata,
        }
    }
}

/// Bridges stage emissions onto an optional [`StreamEmitter`], applying
/// the visibility filter.
pub struct StreamBridge {
    emitter: Option<Box<dyn StreamEmitter>>,
    visibility: StreamVisibility,
}

impl std::fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBridge")
            .field("attached", &self.emitter.is_some())
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl StreamBridge {
    #[must_use]
    pub fn detached() -> Self {
        Self {
            emitter: None,
            visibility: StreamVisibility::default(),
        }
    }

    #[must_use]
    pub fn new(emitter: Box<dyn StreamEmitter>, visibility: StreamVisibility) -> Self {
        Self {
            emitter: Some(emitter),
            visibility,
        }
    }

    pub fn emit(&self, event: StreamEvent) {
        if let Some(emitter) = &self.emitter
            && self.visibility.allows(event.category())
        {
            emitter.emit(event);
        }
    }

    /// Detach the emitter (cleanup).
    pub fn detach(&mut self) {
        self.emitter = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn collecting_handler_orders_document_output() {
        let handler = CollectingEffectHandler::new();
        handler.handle_effect(Effect::doc("Hello"));
        handler.handle_effect(Effect::stdout("ignored for doc"));
        handler.handle_effect(Effect::doc(", World!\n"));
        assert_eq!(handler.document(), "Hello, World!\n");
    }

    #[test]
    fn visibility_gates_categories() {
        let quiet = StreamVisibility::default();
        assert!(quiet.allows(StreamCategory::Content));
        assert!(!quiet.allows(StreamCategory::Tools));

        let all = StreamVisibility {
            show_all: true,
            ..StreamVisibility::default()
        };
        assert!(all.allows(StreamCategory::Metadata));

        let off = StreamVisibility {
            no_stream: true,
            show_all: true,
            ..StreamVisibility::default()
        };
        assert!(!off.allows(StreamCategory::Content));
    }
}
