//! Matching of directives against candidate containers.
//!
//! The [`ClaimSet`] is owned by a single aggregator per pass, so a
//! claim is a plain read-modify-write.  Which directive wins a
//! container that several could match depends on the order results
//! arrive at the aggregator, which is not deterministic.

use std::collections::HashMap;

use crate::directive::{Directive, DirectiveId, TargetType};
use crate::types::ContainerSnapshot;

/// Containers and directives already paired during the current pass.
#[derive(Debug, Default)]
pub struct ClaimSet {
    /// Container id -> first directive that claimed it.
    containers: HashMap<String, DirectiveId>,
    /// Directive -> container it claimed.
    directives: HashMap<DirectiveId, String>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_container_claimed(&self, container_id: &str) -> bool {
        self.containers.contains_key(container_id)
    }

    pub fn is_directive_claimed(&self, directive: &DirectiveId) -> bool {
        self.directives.contains_key(directive)
    }

    /// Records the pairing unless either side is already claimed.
    pub fn claim(&mut self, directive: &DirectiveId, container_id: &str) -> bool {
        if self.is_container_claimed(container_id) || self.is_directive_claimed(directive) {
            return false;
        }
        self.record(directive, container_id);
        true
    }

    /// Claims the container carrying `directive`.  All directives of a
    /// container may claim it, unless another container's directive
    /// already holds it.
    pub fn claim_own(&mut self, directive: &DirectiveId) -> bool {
        if self.is_directive_claimed(directive) {
            return false;
        }
        if let Some(holder) = self.containers.get(&directive.origin) {
            if holder.origin != directive.origin {
                return false;
            }
        }
        let origin = directive.origin.clone();
        self.record(directive, &origin);
        true
    }

    fn record(&mut self, directive: &DirectiveId, container_id: &str) {
        self.containers
            .entry(container_id.to_string())
            .or_insert_with(|| directive.clone());
        self.directives
            .insert(directive.clone(), container_id.to_string());
    }

    /// Number of claimed containers.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Textual comparison of a candidate against a directive's target.
/// Does not look at or modify claims.
pub fn target_matches(directive: &Directive, candidate: &ContainerSnapshot) -> bool {
    let mode = directive.match_mode;
    match directive.target_type {
        TargetType::ContainerName => {
            candidate
                .stripped_names()
                .any(|name| mode.matches(name, &directive.target))
                || candidate
                    .k8s_container_name()
                    .is_some_and(|name| mode.matches(name, &directive.target))
        }
        TargetType::Image => mode.matches(&candidate.image, &directive.target),
    }
}

/// Matches a candidate and claims it for the directive on success.
/// Fails without touching the claim set when the candidate or the
/// directive is already claimed.
pub fn match_target(
    directive: &Directive,
    candidate: &ContainerSnapshot,
    claims: &mut ClaimSet,
) -> bool {
    if claims.is_container_claimed(&candidate.id) || claims.is_directive_claimed(&directive.id) {
        return false;
    }
    target_matches(directive, candidate) && claims.claim(&directive.id, &candidate.id)
}
