// crates/runbook-core/src/runbook.rs
// ============================================================================
// Module: Runbook Schema
// Description: The typed Runbook/Step data model and its structural invariants.
// Purpose: Give the loader a validated shape to hand the orchestrator (§3, §4.1).
// Dependencies: serde
// ============================================================================

//! A [`Runbook`] is the validated, in-memory form of a playbook. Nothing
//! in this module parses YAML — that's [`crate::loader`]'s job. This
//! module only defines the shape and the four structural invariants a
//! runbook must satisfy before the orchestrator will touch it.

use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use crate::action::Action;
use crate::identifiers::RunbookId;
use crate::identifiers::StepId;

/// Graduated automation level (§1, Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AutomationLevel {
    /// Manual checklist; no action is dispatched automatically.
    L0,
    /// Read actions run automatically; write actions pause for approval.
    L1,
    /// Write actions are simulated only and queued for promotion.
    L2,
}

/// Execution mode requested for a run (§3 `Execution`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Actions are dispatched to real external systems.
    Production,
    /// Write actions are synthesized, never sent externally.
    Simulation,
    /// Adapters validate only; no external effect of any kind.
    DryRun,
}

/// `on_error` behavior for a step (§3 `Step`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Terminate the execution as failed.
    Halt,
    /// Record the failure and proceed to the next step.
    Continue,
    /// Mark the step skipped, not failed, and proceed.
    Skip,
}

/// Runbook metadata block (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Human name, 3-100 chars, no leading/trailing whitespace.
    pub name: String,
    /// Author of the runbook.
    pub author: String,
    /// ISO-8601 creation timestamp.
    pub created: String,
    /// ISO-8601 last-update timestamp.
    pub updated: String,
    /// 1-20 tags, each 2-50 chars.
    pub tags: Vec<String>,
    /// Optional reference URLs.
    #[serde(default)]
    pub references: Vec<String>,
}

/// Runbook trigger-matching block (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triggers {
    /// Detection sources this runbook responds to (>=1).
    pub detection_source: Vec<String>,
    /// MITRE ATT&CK technique ids matching `T####(.###)?` (>=1).
    pub mitre_technique: Vec<String>,
    /// Target platforms (>=1).
    pub platform: Vec<String>,
    /// Optional severity filter.
    #[serde(default)]
    pub severities: Vec<String>,
}

/// Runbook execution config block (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunbookConfig {
    /// Graduated automation level.
    pub automation_level: AutomationLevel,
    /// Maximum execution wall-clock time, 60-3600 s.
    pub max_execution_time: u32,
    /// Whether write actions require approval at L1.
    pub requires_approval: bool,
    /// Approval timeout, 300-7200 s. Defaults applied by the approval gate.
    #[serde(default)]
    pub approval_timeout: Option<u32>,
    /// Whether independent steps may run concurrently.
    #[serde(default)]
    pub parallel_execution: bool,
    /// Whether a failed halt-step triggers a rollback sequence.
    #[serde(default)]
    pub rollback_on_failure: bool,
}

/// Rollback specification attached to a step (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSpec {
    /// Action to invoke on rollback.
    pub action: Action,
    /// Parameters for the rollback action (values may be templates).
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Rollback timeout, 5-600 s.
    pub timeout: u32,
    /// Behavior if the rollback action itself errors.
    #[serde(default)]
    pub on_error: Option<OnError>,
}

/// A single step within a runbook (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Identifier, unique within the owning runbook.
    pub id: StepId,
    /// Human name.
    pub name: String,
    /// Optional free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Action this step invokes.
    pub action: Action,
    /// Name of the adapter that should execute this step.
    pub executor: String,
    /// Parameters passed to the adapter (values may contain templates).
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Whether this specific step requires approval regardless of the policy default.
    #[serde(default)]
    pub approval_required: Option<bool>,
    /// Optional rollback specification.
    #[serde(default)]
    pub rollback: Option<RollbackSpec>,
    /// Behavior on step failure.
    pub on_error: OnError,
    /// Step timeout, 5-600 s.
    pub timeout: u32,
    /// Step ids that must have succeeded before this one runs.
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Optional gating condition expression.
    #[serde(default)]
    pub condition: Option<String>,
}

/// A validated, in-memory runbook (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    /// UUIDv4 runbook identifier.
    pub id: RunbookId,
    /// Runbook version string.
    pub version: String,
    /// Metadata block.
    pub metadata: Metadata,
    /// Trigger-matching block.
    pub triggers: Triggers,
    /// Execution config block.
    pub config: RunbookConfig,
    /// Ordered steps, 1-50.
    pub steps: Vec<Step>,
}

/// A single violated structural invariant (§3 "Invariants on a Runbook").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunbookInvariantError {
    /// Two or more steps share an id.
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    /// A `depends_on` entry names a step that doesn't exist.
    #[error("step {step} depends on undefined step {dependency}")]
    UndefinedDependency {
        /// The step declaring the dependency.
        step: String,
        /// The undefined dependency id.
        dependency: String,
    },
    /// The `depends_on` graph contains a cycle.
    #[error("circular dependency detected involving step {0}")]
    CircularDependency(String),
    /// `automation_level = L2` without `requires_approval = true`.
    #[error("automation_level L2 requires requires_approval = true")]
    L2RequiresApproval,
}

impl Runbook {
    /// Checks the four structural invariants from §3.
    ///
    /// Schema-level validation (string lengths, UUID shape, timestamp
    /// format, step count bounds) happens in [`crate::loader`]; this
    /// method only checks relationships between steps that the `serde`
    /// shape alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns every violated invariant (not just the first).
    pub fn check_invariants(&self) -> Vec<RunbookInvariantError> {
        let mut errors = Vec::new();

        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !seen.insert(step.id.clone()) {
                errors.push(RunbookInvariantError::DuplicateStepId(
                    step.id.as_str().to_owned(),
                ));
            }
        }

        let known_ids: HashSet<&StepId> = self.steps.iter().map(|s| &s.id).collect();
        for step in &self.steps {
            for dependency in &step.depends_on {
                if !known_ids.contains(dependency) {
                    errors.push(RunbookInvariantError::UndefinedDependency {
                        step: step.id.as_str().to_owned(),
                        dependency: dependency.as_str().to_owned(),
                    });
                }
            }
        }

        if errors.is_empty() {
            if let Some(cycle_node) = self.find_cycle() {
                errors.push(RunbookInvariantError::CircularDependency(cycle_node));
            }
        }

        if self.config.automation_level == AutomationLevel::L2 && !self.config.requires_approval {
            errors.push(RunbookInvariantError::L2RequiresApproval);
        }

        errors
    }

    /// Depth-first search with a recursion-stack set, returning the id of a
    /// step involved in a cycle if one exists (§4.1).
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: std::collections::HashMap<&StepId, Mark> = std::collections::HashMap::new();
        let by_id: std::collections::HashMap<&StepId, &Step> =
            self.steps.iter().map(|s| (&s.id, s)).collect();

        fn visit<'a>(
            step: &'a Step,
            by_id: &std::collections::HashMap<&'a StepId, &'a Step>,
            marks: &mut std::collections::HashMap<&'a StepId, Mark>,
        ) -> Option<String> {
            marks.insert(&step.id, Mark::Visiting);
            for dependency in &step.depends_on {
                match marks.get(dependency) {
                    Some(Mark::Visiting) => return Some(dependency.as_str().to_owned()),
                    Some(Mark::Done) => continue,
                    None => {
                        if let Some(next) = by_id.get(dependency) {
                            if let Some(found) = visit(next, by_id, marks) {
                                return Some(found);
                            }
                        }
                    }
                }
            }
            marks.insert(&step.id, Mark::Done);
            None
        }

        for step in &self.steps {
            if !matches!(marks.get(&step.id), Some(Mark::Done)) {
                if let Some(found) = visit(step, &by_id, &mut marks) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Returns `true` when this runbook has no structural invariant violations.
    #[must_use]
    pub fn is_structurally_valid(&self) -> bool {
        self.check_invariants().is_empty()
    }
}
