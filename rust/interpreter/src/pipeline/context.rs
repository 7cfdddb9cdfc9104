//! Per-stage pipeline context.

use serde::{Deserialize, Serialize};

/// The context snapshot built for each stage attempt.
///
/// Embedded js/node stages see this as the immutable `ctx` object via
/// [`ctx_view`](Self::ctx_view).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContextSnapshot {
    pub pipeline_id: String,
    pub stage_index: usize,
    /// Branch index when the stage runs inside a parallel group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_index: Option<usize>,
    /// 1-based attempt number.
    pub try_number: u32,
    /// Outputs of the previous attempts of this stage, oldest first.
    pub tries: Vec<serde_json::Value>,
    /// The stage's input value.
    pub input: serde_json::Value,
    /// The retry hint from a guard or `retry` directive, already
    /// evaluated against the current context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<serde_json::Value>,
}

impl PipelineContextSnapshot {
    #[must_use]
    pub fn first_attempt(
        pipeline_id: impl Into<String>,
        stage_index: usize,
        input: serde_json::Value,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage_index,
            parallel_index: None,
            try_number: 1,
            tries: Vec::new(),
            input,
            hint: None,
        }
    }

    /// The next attempt: bumps `try`, records the failed output, carries
    /// the new hint.
    #[must_use]
    pub fn retry(mut self, previous_output: serde_json::Value, hint: Option<serde_json::Value>) -> Self {
        self.try_number += 1;
        self.tries.push(previous_output);
        self.hint = hint;
        self
    }

    /// The `ctx` object exposed to embedded code.
    #[must_use]
    pub fn ctx_view(&self) -> serde_json::Value {
        serde_json::json!({
            "try": self.try_number,
            "tries": self.tries,
            "input": self.input,
            "hint": self.hint,
            "stage": self.stage_index,
            "pipelineId": self.pipeline_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn retry_accumulates_history() {
        let first = PipelineContextSnapshot::first_attempt("p1", 0, serde_json::json!("in"));
        assert_eq!(first.try_number, 1);
        assert!(first.tries.is_empty());

        let second = first.retry(serde_json::json!("retry"), Some(serde_json::json!("go")));
        assert_eq!(second.try_number, 2);
        assert_eq!(second.tries.len(), 1);
        assert_eq!(second.hint, Some(serde_json::json!("go")));

        let view = second.ctx_view();
        assert_eq!(view["try"], serde_json::json!(2));
        assert_eq!(view["tries"], serde_json::json!(["retry"]));
    }
}
