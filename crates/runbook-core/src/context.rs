// crates/runbook-core/src/context.rs
// ============================================================================
// Module: Execution Context
// Description: Layered, copy-on-write data visible to templates and steps.
// Purpose: Give every step a reproducible view of the alert, prior outputs, and env (§3, §9).
// Dependencies: serde_json
// ============================================================================

//! Each mutation of an [`ExecutionContext`] produces a new snapshot; the
//! previous one is retained by whoever held a clone of it (typically the
//! persisted [`crate::execution::Execution`] row). This is the "source
//! pattern of a mutable object passed by reference recast as a
//! copy-on-write snapshot" described in §9: cheap crash recovery
//! (persist the tip), reproducible audit (every StepResult names a
//! specific tip), and deterministic parallelism (a step observes only
//! its predecessors' outputs).

use std::collections::HashMap;
use std::env;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// The four named layers of an [`ExecutionContext`] (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// The input alert event, as JSON.
    alert: Value,
    /// Per-step outputs, keyed by step id, appended as steps complete.
    steps: HashMap<String, Value>,
    /// Runbook-local variables.
    context: HashMap<String, Value>,
    /// Process environment snapshot, read-only.
    env: HashMap<String, String>,
}

impl ExecutionContext {
    /// Builds a fresh context from an alert value and optional initial
    /// runbook-local variables (§4.9 step 3). The `env` layer is
    /// snapshotted from the process environment at construction time.
    #[must_use]
    pub fn new(alert: Value, context: HashMap<String, Value>) -> Self {
        Self {
            alert,
            steps: HashMap::new(),
            context,
            env: env::vars().collect(),
        }
    }

    /// Returns a new snapshot with `output` published under
    /// `steps.<step_id>.output`. The receiver is left untouched; the
    /// returned value is the new tip.
    #[must_use]
    pub fn with_step_output(&self, step_id: &str, output: Value) -> Self {
        let mut next = self.clone();
        next.steps.insert(step_id.to_owned(), output);
        next
    }

    /// Resolves a dotted path against the four layers.
    ///
    /// `env.X` falls back to the live process environment when the
    /// `env` layer (snapshotted at construction) doesn't contain `X` —
    /// this only matters for contexts rehydrated from storage, since a
    /// freshly constructed context already captured the environment.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;

        match root {
            "alert" => resolve_segments(&self.alert, segments),
            "steps" => resolve_segments(&steps_as_value(&self.steps), segments),
            "context" => resolve_segments(&context_as_value(&self.context), segments),
            "env" => {
                let key = segments.next()?;
                if segments.next().is_some() {
                    return None;
                }
                self.env
                    .get(key)
                    .cloned()
                    .or_else(|| env::var(key).ok())
                    .map(Value::String)
            }
            _ => None,
        }
    }

    /// Read-only access to the alert layer, used by adapters that need
    /// the raw alert rather than a templated parameter.
    #[must_use]
    pub fn alert(&self) -> &Value {
        &self.alert
    }

    /// Read-only access to the runbook-local variable layer.
    #[must_use]
    pub fn context_vars(&self) -> &HashMap<String, Value> {
        &self.context
    }

    /// Read-only access to recorded step outputs, keyed by step id.
    #[must_use]
    pub fn step_outputs(&self) -> &HashMap<String, Value> {
        &self.steps
    }
}

fn steps_as_value(steps: &HashMap<String, Value>) -> Value {
    let mut map = serde_json::Map::new();
    for (id, output) in steps {
        let mut entry = serde_json::Map::new();
        entry.insert("output".to_owned(), output.clone());
        map.insert(id.clone(), Value::Object(entry));
    }
    Value::Object(map)
}

fn context_as_value(context: &HashMap<String, Value>) -> Value {
    Value::Object(context.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn resolve_segments<'a>(root: &Value, segments: impl Iterator<Item = &'a str>) -> Option<Value> {
    let mut current = root.clone();
    for segment in segments {
        current = current.as_object()?.get(segment)?.clone();
    }
    Some(current)
}
