//! One discovery pass over the running containers.
//!
//! The pass enumerates containers, identifies the agent's own container
//! and then runs two lookups:
//!
//! * **reverse**: directives carried by the agent, matched against every
//!   other container;
//! * **forward**: directives carried by other containers, configuring
//!   the carrying container (or, with `r=true`, matched against the
//!   other containers).
//!
//! Each lookup fans out one task per container.  Tasks only fetch and
//! decode; the claim set and the inspection cache are owned by the pass
//! and mutated solely by the aggregator consuming the task results.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::task::JoinSet;

use crate::annotations::{discovery_entries, merge_annotations};
use crate::config::DiscoverySettings;
use crate::directive::Directive;
use crate::fanout::FanOut;
use crate::identity::identify_self;
use crate::matcher::{match_target, ClaimSet};
use crate::resolver;
use crate::runtime::ContainerRuntime;
use crate::template::{self, SynthesizedConfig, TemplateStore};
use crate::types::{ContainerInspection, ContainerSnapshot};

type InspectionCache = HashMap<String, Arc<ContainerInspection>>;

/// Outcome of a pass, for logging by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub containers: usize,
    pub self_id: Option<String>,
    pub emitted: usize,
}

/// State scoped to a single pass.
#[derive(Default)]
struct Pass {
    claims: ClaimSet,
    inspections: InspectionCache,
    materializing: JoinSet<Option<SynthesizedConfig>>,
}

/// What a forward-lookup task found on one container.
struct Advertisement {
    container: ContainerSnapshot,
    inspection: Arc<ContainerInspection>,
    fetched: bool,
    directives: Vec<Directive>,
}

pub struct Discovery {
    runtime: Arc<dyn ContainerRuntime>,
    settings: Arc<DiscoverySettings>,
    templates: Arc<TemplateStore>,
    container_id: Option<String>,
}

impl Discovery {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: DiscoverySettings,
        templates: TemplateStore,
        container_id: Option<String>,
    ) -> Self {
        Self {
            runtime,
            settings: Arc::new(settings),
            templates: Arc::new(templates),
            container_id,
        }
    }

    /// Runs one pass, appending every synthesized configuration to `out`.
    pub async fn run(&mut self, out: &mut Vec<SynthesizedConfig>) -> PassSummary {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                debug!("unable to perform container list: {}", e);
                return PassSummary {
                    self_id: self.container_id.clone(),
                    ..Default::default()
                };
            }
        };
        debug!(
            "containers {}, container discovery templates {}",
            containers.len(),
            self.templates.len()
        );

        if self.container_id.is_none() && !containers.is_empty() {
            self.container_id = identify_self(Arc::clone(&self.settings), &containers).await;
        }

        let before = out.len();
        let mut pass = Pass::default();
        self.reverse_lookup(&containers, &mut pass).await;
        drain(&mut pass.materializing, out).await;
        self.forward_lookup(&containers, &mut pass).await;
        drain(&mut pass.materializing, out).await;

        let summary = PassSummary {
            containers: containers.len(),
            self_id: self.container_id.clone(),
            emitted: out.len() - before,
        };
        info!(
            "discovery pass: {} containers, {} configs synthesized",
            summary.containers, summary.emitted
        );
        summary
    }

    /// Agent directives -> other containers.
    async fn reverse_lookup(&self, containers: &[ContainerSnapshot], pass: &mut Pass) {
        let Some(self_id) = self.container_id.clone() else {
            return;
        };
        let inspection = match self.runtime.inspect_container(&self_id).await {
            Ok(inspection) => Arc::new(inspection),
            Err(e) => {
                debug!("container inspect failed on {}: {}", self_id, e);
                return;
            }
        };
        pass.inspections.insert(self_id.clone(), Arc::clone(&inspection));

        let own = containers
            .iter()
            .find(|c| c.id == self_id)
            .cloned()
            .unwrap_or_else(|| ContainerSnapshot {
                id: self_id.clone(),
                ..Default::default()
            });
        let directives = directives_of(&own, &inspection);
        if directives.is_empty() {
            return;
        }

        let runtime = &self.runtime;
        let mut fan_out = FanOut::spawn(
            containers.iter().filter(|c| c.id != self_id).cloned(),
            |container| {
                let runtime = Arc::clone(runtime);
                async move {
                    match runtime.inspect_container(&container.id).await {
                        Ok(inspection) => Some((container, inspection)),
                        Err(e) => {
                            debug!("rev container inspect failed on cid:{}: {}", container.id, e);
                            None
                        }
                    }
                }
            },
        );

        while let Some((container, inspection)) = fan_out.next().await {
            let inspection = Arc::new(inspection);
            pass.inspections.insert(container.id.clone(), Arc::clone(&inspection));
            for directive in &directives {
                if match_target(directive, &container, &mut pass.claims) {
                    debug!("rev lookup matched {}: {}", container.id, directive.id);
                    pass.materializing.spawn(self.materialize(
                        directive.clone(),
                        container.clone(),
                        Arc::clone(&inspection),
                    ));
                    break;
                }
            }
        }
        fan_out.join().await;
    }

    /// Other containers' directives -> themselves, or with `r=true` -> other containers.
    async fn forward_lookup(&self, containers: &[ContainerSnapshot], pass: &mut Pass) {
        let cache = Arc::new(pass.inspections.clone());
        let runtime = &self.runtime;
        let candidates = containers
            .iter()
            .filter(|c| Some(c.id.as_str()) != self.container_id.as_deref())
            .filter(|c| !pass.claims.is_container_claimed(&c.id))
            .cloned();

        let mut fan_out = FanOut::spawn(candidates, |container| {
            let runtime = Arc::clone(runtime);
            let cache = Arc::clone(&cache);
            async move {
                let (inspection, fetched) = match cache.get(&container.id) {
                    Some(inspection) => (Arc::clone(inspection), false),
                    None => match runtime.inspect_container(&container.id).await {
                        Ok(inspection) => (Arc::new(inspection), true),
                        Err(e) => {
                            debug!("container inspect failed on {}: {}", container.id, e);
                            return None;
                        }
                    },
                };
                let directives = directives_of(&container, &inspection);
                Some(Advertisement {
                    container,
                    inspection,
                    fetched,
                    directives,
                })
            }
        });

        let mut deferred = Vec::new();
        while let Some(found) = fan_out.next().await {
            if found.fetched {
                pass.inspections.insert(found.container.id.clone(), Arc::clone(&found.inspection));
            }
            for directive in found.directives {
                debug!("fwd lookup for {}", directive.id);
                if directive.reverse {
                    deferred.push(directive);
                } else if pass.claims.claim_own(&directive.id) {
                    pass.materializing.spawn(self.materialize(
                        directive,
                        found.container.clone(),
                        Arc::clone(&found.inspection),
                    ));
                } else {
                    debug!("{} already claimed, skipping {}", found.container.id, directive.id);
                }
            }
        }
        fan_out.join().await;

        deferred.sort_by(|a, b| a.id.cmp(&b.id));
        for directive in deferred {
            self.match_others(&directive, containers, pass);
        }
    }

    /// Matches a forward directive flagged `r=true` against the other
    /// containers in enumeration order.
    fn match_others(
        &self,
        directive: &Directive,
        containers: &[ContainerSnapshot],
        pass: &mut Pass,
    ) {
        let candidates = containers.iter().filter(|c| {
            c.id != directive.id.origin && Some(c.id.as_str()) != self.container_id.as_deref()
        });
        for candidate in candidates {
            let Some(inspection) = pass.inspections.get(&candidate.id).cloned() else {
                continue;
            };
            if match_target(directive, candidate, &mut pass.claims) {
                debug!("fwd reverse lookup matched {}: {}", candidate.id, directive.id);
                pass.materializing
                    .spawn(self.materialize(directive.clone(), candidate.clone(), inspection));
                return;
            }
        }
    }

    /// Resolves coordinates and synthesizes the directive's template for
    /// a claimed target.
    fn materialize(
        &self,
        directive: Directive,
        target: ContainerSnapshot,
        inspection: Arc<ContainerInspection>,
    ) -> impl Future<Output = Option<SynthesizedConfig>> + Send + 'static {
        let runtime = Arc::clone(&self.runtime);
        let settings = Arc::clone(&self.settings);
        let templates = Arc::clone(&self.templates);
        async move {
            if templates.get(&directive.template_file_name()).is_none() {
                debug!(
                    "container discovery {}: containerFileName not found for configName {}",
                    target.id, directive.config_name
                );
                return None;
            }
            let coords =
                resolver::resolve(runtime.as_ref(), &settings, &target, &inspection, &directive)
                    .await;
            template::synthesize(&templates, &directive.config_name, &coords, &target)
        }
    }
}

/// Directives advertised by a container, in annotation-key order.
fn directives_of(
    container: &ContainerSnapshot,
    inspection: &ContainerInspection,
) -> Vec<Directive> {
    let annotations = merge_annotations(container, Some(inspection));
    discovery_entries(&annotations)
        .filter_map(|(key, value)| Directive::parse(&container.id, key, value))
        .collect()
}

async fn drain(set: &mut JoinSet<Option<SynthesizedConfig>>, out: &mut Vec<SynthesizedConfig>) {
    while let Some(res) = set.join_next().await {
        match res {
            Ok(Some(config)) => out.push(config),
            Ok(None) => {}
            Err(e) => error!("config synthesis task failed: {}", e),
        }
    }
}
