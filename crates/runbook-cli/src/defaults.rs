// crates/runbook-cli/src/defaults.rs
// ============================================================================
// Module: Default Registry & Policy
// Description: The adapter registry and automation policy a bare CLI
//              invocation runs with, when no external wiring is supplied.
// Purpose: Give `run` something to dispatch against out of the box (§9
//          "the default registry/policy/config are explicit, resettable
//          singletons", generalized here to one per CLI process).
// Dependencies: runbook-core::{action, adapter, policy, runbook}, runbook-adapters
// ============================================================================

use runbook_adapters::HttpAdapter;
use runbook_adapters::HttpAdapterConfig;
use runbook_adapters::MockNetworkAdapter;
use runbook_adapters::MockSiemAdapter;
use runbook_adapters::WaitAdapter;
use runbook_core::action::Action;
use runbook_core::action::ActionClass;
use runbook_core::adapter::AdapterRegistry;
use runbook_core::adapter::RegistryError;
use runbook_core::policy::ActionSelector;
use runbook_core::policy::AutomationPolicy;
use runbook_core::policy::PolicyRule;
use runbook_core::runbook::AutomationLevel;
use runbook_core::runbook::ExecutionMode;

/// Builds the registry every `runbookctl run` invocation starts from: the
/// reference adapters shipped in `runbook-adapters`.
///
/// # Errors
///
/// Returns [`RegistryError`] if two reference adapters somehow collide on
/// name, which would indicate a bug in this function, not caller input.
pub fn default_registry() -> Result<AdapterRegistry, RegistryError> {
    let mut registry = AdapterRegistry::new();
    registry.register(Box::new(WaitAdapter))?;
    registry.register(Box::new(MockSiemAdapter::default()))?;
    registry.register(Box::new(MockNetworkAdapter::default()))?;
    if let Ok(http) = HttpAdapter::new(HttpAdapterConfig::default()) {
        registry.register(Box::new(http))?;
    }
    Ok(registry)
}

/// Builds the automation policy every `runbookctl run` invocation starts
/// from: one rule per action in the closed catalog (§6.2), split by
/// [`ActionClass`] (§4.8).
///
/// Read actions run at L0 or above, never require approval, and are
/// allowed in every mode. Write actions require L1 or above, always
/// require approval, and admins may override a policy violation for
/// them. A trailing wildcard rule denies anything not named above as a
/// defense-in-depth backstop, even though [`Action`] is a closed enum and
/// every variant is already covered explicitly.
#[must_use]
pub fn default_policy() -> AutomationPolicy {
    let mut rules: Vec<PolicyRule> = Action::ALL
        .iter()
        .map(|action| match action.class() {
            ActionClass::Read => PolicyRule {
                action: ActionSelector::Specific(*action),
                min_level: AutomationLevel::L0,
                requires_approval: false,
                allowed_modes: all_modes(),
                max_risk_score: None,
                admin_override: false,
            },
            ActionClass::Write => PolicyRule {
                action: ActionSelector::Specific(*action),
                min_level: AutomationLevel::L1,
                requires_approval: true,
                allowed_modes: all_modes(),
                max_risk_score: None,
                admin_override: true,
            },
        })
        .collect();

    rules.push(PolicyRule {
        action: ActionSelector::Wildcard,
        min_level: AutomationLevel::L2,
        requires_approval: true,
        allowed_modes: all_modes(),
        max_risk_score: None,
        admin_override: false,
    });

    AutomationPolicy {
        name: "runbookctl-default".to_owned(),
        description: "Default policy: reads run at L0+, writes require L1+ and approval."
            .to_owned(),
        rules,
    }
}

fn all_modes() -> Vec<ExecutionMode> {
    vec![ExecutionMode::Production, ExecutionMode::Simulation, ExecutionMode::DryRun]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_no_duplicate_names() {
        assert!(default_registry().is_ok());
    }

    #[test]
    fn default_policy_covers_every_action_explicitly() {
        let policy = default_policy();
        for action in Action::ALL {
            let matched = policy
                .rules
                .iter()
                .any(|rule| rule.action == ActionSelector::Specific(*action));
            assert!(matched, "no explicit rule for {action}");
        }
    }

    #[test]
    fn read_actions_never_require_approval() {
        let policy = default_policy();
        for rule in &policy.rules {
            if let ActionSelector::Specific(action) = rule.action {
                if action.class() == ActionClass::Read {
                    assert!(!rule.requires_approval);
                }
            }
        }
    }

    #[test]
    fn write_actions_require_approval_and_allow_admin_override() {
        let policy = default_policy();
        for rule in &policy.rules {
            if let ActionSelector::Specific(action) = rule.action {
                if action.class() == ActionClass::Write {
                    assert!(rule.requires_approval);
                    assert!(rule.admin_override);
                }
            }
        }
    }
}
