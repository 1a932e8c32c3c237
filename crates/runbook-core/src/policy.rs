// crates/runbook-core/src/policy.rs
// ============================================================================
// Module: Policy Enforcer
// Description: Per-action rule lookup and the L2-production-write guard.
// Purpose: Decide whether a step may be dispatched, and whether it needs approval (§4.3).
// Dependencies: runbook-core::{action, runbook}
// ============================================================================

//! Rule lookup is first-exact-match then a `*` catch-all fallback,
//! mirroring the allow/deny precedence in the teacher's provider access
//! policy: a more specific rule always wins over the wildcard, and the
//! wildcard is consulted only when nothing more specific matches.

use serde::Deserialize;
use serde::Serialize;

use crate::action::Action;
use crate::action::ActionClass;
use crate::runbook::AutomationLevel;
use crate::runbook::ExecutionMode;

/// An action selector in a [`PolicyRule`]: either a specific action or the
/// `*` catch-all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSelector {
    /// Matches only this action.
    Specific(Action),
    /// Matches any action not matched by a more specific rule.
    Wildcard,
}

/// Severity of a policy [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks the action unless an admin override applies.
    Error,
    /// Recorded but does not block (post admin-override downgrade).
    Warning,
}

/// A single policy rule violation (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable rule code, e.g. `insufficient_level`.
    pub code: &'static str,
    /// Human-readable explanation.
    pub message: String,
    /// Severity, possibly downgraded by an admin override.
    pub severity: Severity,
}

impl Violation {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// A single rule in an [`AutomationPolicy`] (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Action (or wildcard) this rule applies to.
    pub action: ActionSelector,
    /// Minimum automation level required to run this action.
    pub min_level: AutomationLevel,
    /// Whether this action requires human approval.
    pub requires_approval: bool,
    /// Execution modes this action may run under.
    pub allowed_modes: Vec<ExecutionMode>,
    /// Maximum risk score (1-10) this action may be dispatched at.
    pub max_risk_score: Option<u8>,
    /// Whether an admin identity may override violations of this rule.
    pub admin_override: bool,
}

/// A named, ordered set of [`PolicyRule`]s (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationPolicy {
    /// Policy name.
    pub name: String,
    /// Human description.
    pub description: String,
    /// Ordered rules; lookup is first-exact-match then wildcard.
    pub rules: Vec<PolicyRule>,
}

impl AutomationPolicy {
    fn find_rule(&self, action: Action) -> Option<&PolicyRule> {
        self.rules
            .iter()
            .find(|rule| rule.action == ActionSelector::Specific(action))
            .or_else(|| self.rules.iter().find(|rule| rule.action == ActionSelector::Wildcard))
    }
}

/// Outcome of checking a single action against a policy (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCheckResult {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// The level the action was requested at.
    pub requested_level: AutomationLevel,
    /// The mode the action was requested under.
    pub mode: ExecutionMode,
    /// Whether approval is required for this action, per the matched rule.
    pub requires_approval: bool,
    /// Every violation found, in check order.
    pub violations: Vec<Violation>,
}

/// Checks a single action against `policy` (§4.3 steps 1-6).
///
/// # Errors
///
/// This function cannot fail; a denied action is represented in the
/// returned [`PolicyCheckResult`], not as an `Err`.
#[must_use]
pub fn check_policy(
    action: Action,
    requested_level: AutomationLevel,
    mode: ExecutionMode,
    risk_score: Option<u8>,
    is_admin: bool,
    policy: &AutomationPolicy,
) -> PolicyCheckResult {
    let Some(rule) = policy.find_rule(action) else {
        return PolicyCheckResult {
            allowed: false,
            requested_level,
            mode,
            requires_approval: false,
            violations: vec![Violation::new(
                "no_matching_rule",
                format!("no policy rule matches action {action}"),
            )],
        };
    };

    let mut violations = Vec::new();

    if requested_level < rule.min_level {
        violations.push(Violation::new(
            "insufficient_level",
            format!(
                "action {action} requires level {:?} or higher, got {requested_level:?}",
                rule.min_level
            ),
        ));
    }

    if !rule.allowed_modes.contains(&mode) {
        violations.push(Violation::new(
            "mode_not_allowed",
            format!("action {action} is not allowed in mode {mode:?}"),
        ));
    }

    if let (Some(max), Some(score)) = (rule.max_risk_score, risk_score) {
        if score > max {
            violations.push(Violation::new(
                "risk_score_exceeded",
                format!("risk score {score} exceeds cap {max} for action {action}"),
            ));
        }
    }

    if requested_level == AutomationLevel::L2
        && mode == ExecutionMode::Production
        && action.class() == ActionClass::Write
    {
        violations.push(Violation::new(
            "l2_production_write_blocked",
            format!("write action {action} may not run in production at L2"),
        ));
    }

    let allowed = if violations.is_empty() {
        true
    } else if is_admin && rule.admin_override {
        for violation in &mut violations {
            violation.severity = Severity::Warning;
        }
        true
    } else {
        false
    };

    PolicyCheckResult {
        allowed,
        requested_level,
        mode,
        requires_approval: rule.requires_approval,
        violations,
    }
}

/// Checks whether L2 automation is permitted at all (§4.3 "separate
/// `validateL2Enabled` gate").
///
/// Returns `Some(violation)` when `level = L2` but the opt-in flag is
/// `false`; `None` otherwise (including for any level below L2).
#[must_use]
pub fn validate_l2_enabled(enabled: bool, level: AutomationLevel) -> Option<Violation> {
    if level == AutomationLevel::L2 && !enabled {
        Some(Violation::new(
            "l2_flag_required",
            "L2 automation requires the explicit enable-l2 opt-in flag",
        ))
    } else {
        None
    }
}

/// Batch-checks a set of `(step_id, action)` pairs. When L2 is requested
/// without the opt-in flag, every step is short-circuited with the same
/// `l2_flag_required` violation rather than being checked individually
/// (§4.3).
#[must_use]
pub fn validate_batch(
    steps: &[(String, Action)],
    policy: &AutomationPolicy,
    requested_level: AutomationLevel,
    mode: ExecutionMode,
    enable_l2: bool,
    is_admin: bool,
    risk_score: Option<u8>,
) -> Vec<(String, PolicyCheckResult)> {
    if let Some(violation) = validate_l2_enabled(enable_l2, requested_level) {
        return steps
            .iter()
            .map(|(step_id, _)| {
                (
                    step_id.clone(),
                    PolicyCheckResult {
                        allowed: false,
                        requested_level,
                        mode,
                        requires_approval: false,
                        violations: vec![violation.clone()],
                    },
                )
            })
            .collect();
    }

    steps
        .iter()
        .map(|(step_id, action)| {
            (
                step_id.clone(),
                check_policy(*action, requested_level, mode, risk_score, is_admin, policy),
            )
        })
        .collect()
}
