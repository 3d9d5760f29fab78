//! Decides whether a candidate violation can be trusted given what the
//! credential was able to see.

use std::{collections::HashMap, sync::Arc};

use tracing::info;

use crate::{
    collected::CollectedData,
    permissions::has_scope,
    policy::{ViolationCandidate, PREREQUISITES, REQUIRED_SCOPES},
    run_context::RunContext,
};

type Prerequisite = fn(&CollectedData, &RunContext) -> bool;

pub const PREMIUM: &str = "premium";
pub const SCORECARD_ENABLED: &str = "scorecard_enabled";

fn prerequisite_table() -> HashMap<&'static str, Prerequisite> {
    let mut table: HashMap<&'static str, Prerequisite> = HashMap::new();
    table.insert(PREMIUM, |data, _| data.context.premium());
    table.insert(SCORECARD_ENABLED, |_, ctx| ctx.scorecard_enabled());
    table
}

pub struct Skipper {
    ctx: Arc<RunContext>,
    prerequisites: HashMap<&'static str, Prerequisite>,
}

impl Skipper {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx, prerequisites: prerequisite_table() }
    }

    /// `true` when the violation must be dropped: a prerequisite does not hold
    /// or a required scope is missing. Unknown prerequisites count as unmet.
    pub fn should_skip(&self, data: &CollectedData, violation: &ViolationCandidate) -> bool {
        self.missing_prerequisite(data, violation) || self.missing_scope(data, violation)
    }

    fn missing_prerequisite(&self, data: &CollectedData, violation: &ViolationCandidate) -> bool {
        for name in violation.annotation(PREREQUISITES) {
            let met = match self.prerequisites.get(name.as_str()) {
                Some(check) => check(data, &self.ctx),
                None => false,
            };
            if !met {
                info!(
                    "Skipping {} for {}: prerequisite {name} is not met",
                    violation.policy, violation.entity_name
                );
                return true;
            }
        }
        false
    }

    fn missing_scope(&self, data: &CollectedData, violation: &ViolationCandidate) -> bool {
        let roles = data.context.roles();
        for scope in violation.annotation(REQUIRED_SCOPES) {
            if !has_scope(&scope, &self.ctx.token_scopes, roles) {
                info!(
                    "Skipping {} for {}: missing scope {scope}",
                    violation.policy, violation.entity_name
                );
                return true;
            }
        }
        false
    }
}
