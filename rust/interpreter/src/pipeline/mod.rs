//! The pipeline engine.
//!
//! `value | @stageA | @stageB` runs stage-by-stage, piping the previous
//! output as each stage's first argument. The source is stage 0 and is
//! evaluated inside the pipeline context, so a `retry` outcome from a
//! stage re-runs its producer with a bumped shared attempt counter: the
//! producer sees the new `ctx.try`, the retrying stage sees the fresh
//! input, and `ctx.tries` accumulates the inputs of failed attempts.
//!
//! Pre-hooks consult the guard registry, post-hooks record guard history
//! and propagate taint descriptors. Stages execute strictly in order: a
//! stage's post-hooks complete before the next stage starts, and retries
//! for stage N run to completion before stage N+1 begins.

mod context;
mod guards;

use std::sync::Arc;

use mlld_ast::{EffectStageKind, PipeStage, ValueExpr};
use mlld_security::SecurityDescriptor;

pub use context::PipelineContextSnapshot;
pub use guards::{GuardDecision, GuardRecord, GuardRegistry, condition_matches};

use crate::context::DeniedContext;
use crate::effects::{Effect, StreamEvent};
use crate::env::Environment;
use crate::error::{MlldError, MlldResult};
use crate::eval::value::RuntimeValue;
use crate::interpolate::{self, InterpolationContext};
use crate::transformers;

/// Retry budget per stage; exceeding it is a pipeline error.
pub const MAX_PIPELINE_RETRIES: u32 = 10;

/// A value plus the security descriptor accumulated so far.
#[derive(Debug, Clone, PartialEq)]
pub struct StageValue {
    pub value: RuntimeValue,
    pub descriptor: SecurityDescriptor,
}

impl StageValue {
    #[must_use]
    pub fn new(value: RuntimeValue) -> Self {
        Self {
            value,
            descriptor: SecurityDescriptor::default(),
        }
    }
}

/// The result of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Value(StageValue),
    /// A guard denied a stage; the denial is also recorded in the
    /// ambient context for `when denied` arms. The wrapped stage never
    /// ran.
    Denied {
        guard: String,
        reason: String,
        stage: String,
    },
}

/// How the pipeline obtains (and re-obtains, on retry) its stage-0
/// value.
enum Producer<'a> {
    /// A pre-computed value; retries reuse it unchanged.
    Fixed(StageValue),
    /// A re-evaluable source expression.
    Expr(&'a ValueExpr),
}

/// What one stage attempt produced.
enum StageAttempt {
    Done(StageValue),
    /// The stage asked for its input to be produced again
    /// (`retry` / `retry "hint"`).
    Retry { hint: Option<serde_json::Value> },
}

/// Run a pipeline over a pre-computed initial value.
///
/// # Errors
///
/// Stage execution errors and retry exhaustion.
pub async fn run_pipeline(
    env: &Arc<Environment>,
    initial: StageValue,
    stages: &[PipeStage],
) -> MlldResult<PipelineOutcome> {
    run(env, Producer::Fixed(initial), stages).await
}

/// Run a pipeline whose source is an expression, evaluated as stage 0
/// inside the pipeline context (so it can read `ctx.try` and be re-run
/// by a downstream `retry`).
///
/// # Errors
///
/// Source and stage execution errors, retry exhaustion.
pub async fn run_pipeline_expr(
    env: &Arc<Environment>,
    source: &ValueExpr,
    stages: &[PipeStage],
) -> MlldResult<PipelineOutcome> {
    run(env, Producer::Expr(source), stages).await
}

async fn produce(env: &Arc<Environment>, producer: &Producer<'_>) -> MlldResult<StageValue> {
    match producer {
        Producer::Fixed(value) => Ok(value.clone()),
        Producer::Expr(expr) => {
            let value = crate::eval::value::evaluate_value_expr(env, expr, 0).await?;
            let mut descriptor = env.current_descriptor();
            // A reference-valued source carries its variable's recorded
            // taint into the pipeline so guards can see it.
            if let ValueExpr::Reference { reference } = expr
                && let Some(taint) =
                    env.with_taint(|tracker| tracker.descriptor_of(&reference.identifier).cloned())
            {
                descriptor = descriptor.union(&taint);
            }
            Ok(StageValue { value, descriptor })
        }
    }
}

async fn run(
    env: &Arc<Environment>,
    producer: Producer<'_>,
    stages: &[PipeStage],
) -> MlldResult<PipelineOutcome> {
    let pipeline_id = uuid::Uuid::new_v4().to_string();

    // Stage 0: the source, evaluated under a pipeline context so embedded
    // code sees ctx.try = 1 on the first attempt.
    let source_snapshot =
        PipelineContextSnapshot::first_attempt(&pipeline_id, 0, serde_json::Value::Null);
    env.context().set_pipeline_context(source_snapshot);
    let produced = produce(env, &producer).await;
    env.context().clear_pipeline_context();
    let mut current = produced?;

    for (index, stage) in stages.iter().enumerate() {
        let stage_index = index + 1;
        emit_stream(
            env,
            StreamEvent::Progress {
                stage: stage.name().to_string(),
                stage_index,
            },
        );

        let mut snapshot = PipelineContextSnapshot::first_attempt(
            &pipeline_id,
            stage_index,
            current.value.to_json(),
        );

        loop {
            env.context().set_pipeline_context(snapshot.clone());

            // Pre-hook: guards, unless a guard body is already running.
            let decision = if env.should_suppress_guards() {
                GuardDecision::Allow
            } else {
                env.guards().decide_before(stage.name(), &current.descriptor)
            };

            let attempt = match decision {
                GuardDecision::Allow => execute_stage(env, stage, &current).await,
                GuardDecision::Deny { guard, reason } => {
                    env.guards().record(GuardRecord {
                        guard: guard.clone(),
                        stage: stage.name().to_string(),
                        stage_index,
                        attempt: snapshot.try_number,
                        outcome: "deny".to_string(),
                    });
                    env.context().clear_pipeline_context();
                    env.context().set_denied(DeniedContext {
                        guard: guard.clone(),
                        reason: reason.clone(),
                        stage: Some(stage.name().to_string()),
                    });
                    return Ok(PipelineOutcome::Denied {
                        guard,
                        reason,
                        stage: stage.name().to_string(),
                    });
                }
                GuardDecision::Retry { guard, hint } => {
                    env.guards().record(GuardRecord {
                        guard: guard.clone(),
                        stage: stage.name().to_string(),
                        stage_index,
                        attempt: snapshot.try_number,
                        outcome: "retry".to_string(),
                    });
                    // Function-valued hints are evaluated now, against
                    // the current context, not at guard-definition time.
                    let hint_value = evaluate_hint(env, hint.as_ref()).await;
                    match hint_value {
                        Ok(value) => Ok(StageAttempt::Retry { hint: value }),
                        Err(err) => Err(err),
                    }
                }
            };
            env.context().clear_pipeline_context();

            match attempt? {
                StageAttempt::Done(output) => {
                    // Post-hooks: guard history, then taint propagation.
                    env.guards().record(GuardRecord {
                        guard: String::new(),
                        stage: stage.name().to_string(),
                        stage_index,
                        attempt: snapshot.try_number,
                        outcome: "success".to_string(),
                    });
                    let descriptor = current.descriptor.union(&output.descriptor);
                    current = StageValue {
                        value: output.value,
                        descriptor,
                    };
                    break;
                }
                StageAttempt::Retry { hint } => {
                    if snapshot.try_number >= MAX_PIPELINE_RETRIES {
                        return Err(MlldError::RetriesExhausted {
                            stage: stage.name().to_string(),
                            max: MAX_PIPELINE_RETRIES,
                        });
                    }
                    // Bump the shared attempt counter, then re-run the
                    // producer under the new context so it sees the
                    // incremented ctx.try and the hint.
                    snapshot = snapshot.retry(current.value.to_json(), hint);
                    if index == 0 {
                        env.context().set_pipeline_context(snapshot.clone());
                        let reproduced = produce(env, &producer).await;
                        env.context().clear_pipeline_context();
                        current = StageValue {
                            descriptor: current.descriptor.clone(),
                            ..reproduced?
                        };
                    }
                    snapshot.input = current.value.to_json();
                }
            }
        }
    }

    Ok(PipelineOutcome::Value(current))
}

/// Evaluate a retry hint expression. Guard evaluation is suppressed so a
/// hint function cannot re-trigger the guard that produced it.
async fn evaluate_hint(
    env: &Arc<Environment>,
    hint: Option<&ValueExpr>,
) -> MlldResult<Option<serde_json::Value>> {
    let Some(expr) = hint else { return Ok(None) };
    let value = env
        .with_guard_suppression(crate::eval::value::evaluate_value_expr(env, expr, 0))
        .await?;
    Ok(Some(value.to_json()))
}

async fn execute_stage(
    env: &Arc<Environment>,
    stage: &PipeStage,
    input: &StageValue,
) -> MlldResult<StageAttempt> {
    match stage {
        PipeStage::Effect { effect } => {
            let text = interpolate::to_context_string(&input.value, InterpolationContext::Default);
            match effect {
                EffectStageKind::Show => env.emit_effect(Effect::doc(format!("{text}\n"))),
                EffectStageKind::Log => env.emit_effect(Effect::stderr(format!("{text}\n"))),
                EffectStageKind::Output => env.emit_effect(Effect::stdout(format!("{text}\n"))),
            }
            emit_stream(
                env,
                StreamEvent::Chunk {
                    stage: effect.as_str().to_string(),
                    content: text,
                },
            );
            // Short-form effects pass the value through unchanged.
            Ok(StageAttempt::Done(input.clone()))
        }
        PipeStage::Exec { target, args } => {
            if transformers::is_transformer(target) {
                let transform_input = transformers::TransformValue {
                    text: interpolate::to_context_string(
                        &input.value,
                        InterpolationContext::Default,
                    ),
                    structured: input.value.structured(),
                };
                let output = transformers::apply(target, &transform_input)?;
                let value = match (target.as_str(), output.structured) {
                    // keepStructured preserves the structured view; every
                    // other transformer yields its text rendering.
                    ("keepStructured", Some(structured)) => RuntimeValue::Json(structured),
                    (_, _) => RuntimeValue::Text(output.text),
                };
                return Ok(StageAttempt::Done(StageValue {
                    value,
                    descriptor: input.descriptor.clone(),
                }));
            }

            let mut evaluated = Vec::with_capacity(args.len() + 1);
            evaluated.push(stage_input_value(input));
            for arg in args {
                evaluated.push(crate::eval::value::evaluate_value_expr(env, arg, 0).await?);
            }

            emit_stream(
                env,
                StreamEvent::CommandStart {
                    command: format!("@{target}"),
                },
            );
            let result = crate::eval::invocation::invoke_executable(env, target, evaluated).await?;
            emit_stream(
                env,
                StreamEvent::CommandComplete {
                    command: format!("@{target}"),
                    exit_code: 0,
                },
            );

            if let Some(hint) = parse_retry(&result) {
                return Ok(StageAttempt::Retry { hint });
            }
            Ok(StageAttempt::Done(StageValue {
                value: result,
                descriptor: input.descriptor.clone(),
            }))
        }
    }
}

/// The implicit first argument of a stage: the previous output, viewed
/// as pipeline input.
fn stage_input_value(input: &StageValue) -> RuntimeValue {
    match &input.value {
        RuntimeValue::Json(value) => RuntimeValue::Json(value.clone()),
        other => RuntimeValue::Text(interpolate::to_context_string(
            other,
            InterpolationContext::Default,
        )),
    }
}

/// Detect the `retry` directive in a stage result: the bare word, or
/// `retry <hint>`.
fn parse_retry(result: &RuntimeValue) -> Option<Option<serde_json::Value>> {
    let text = match result {
        RuntimeValue::Text(text) => text.as_str(),
        RuntimeValue::Json(serde_json::Value::String(text)) => text.as_str(),
        _ => return None,
    };
    if text == "retry" {
        return Some(None);
    }
    text.strip_prefix("retry ")
        .map(|hint| Some(serde_json::Value::String(hint.trim().to_string())))
}

fn emit_stream(env: &Arc<Environment>, event: StreamEvent) {
    env.stream()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .emit(event);
}
