//! Locating the agent's own container among the enumerated ones.

use std::sync::Arc;

use log::debug;

use crate::config::DiscoverySettings;
use crate::fanout::FanOut;
use crate::types::ContainerSnapshot;

/// Heuristics tried in order; a lower rank always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SelfMatch {
    /// Image contains the full integration name.
    Image,
    /// A container name contains the short integration name.
    ContainerName,
    /// The Kubernetes container name label contains the short name.
    K8sLabel,
}

/// Strongest heuristic a container satisfies.
pub fn classify(settings: &DiscoverySettings, container: &ContainerSnapshot) -> Option<SelfMatch> {
    let short = settings.integration_name_short.as_str();
    if container.image.contains(&settings.integration_name) {
        Some(SelfMatch::Image)
    } else if container.stripped_names().any(|n| n.contains(short)) {
        Some(SelfMatch::ContainerName)
    } else if container.k8s_container_name().is_some_and(|n| n.contains(short)) {
        Some(SelfMatch::K8sLabel)
    } else {
        None
    }
}

/// Finds the agent's container.  Every container is classified
/// concurrently; after the barrier the best heuristic wins and ties go
/// to the earliest enumerated container.
pub async fn identify_self(
    settings: Arc<DiscoverySettings>,
    containers: &[ContainerSnapshot],
) -> Option<String> {
    debug!("flex container id has not been found internally, falling back to heuristics");

    let candidates = FanOut::spawn(containers.iter().cloned().enumerate(), |(index, container)| {
        let settings = Arc::clone(&settings);
        async move { classify(&settings, &container).map(|rank| (rank, index, container.id)) }
    })
    .collect()
    .await;

    let found = candidates
        .into_iter()
        .min_by_key(|(rank, index, _)| (*rank, *index))
        .map(|(_, _, id)| id);
    match &found {
        Some(id) => debug!("flex container id: {}", id),
        None => debug!("unable to find flex container id"),
    }
    found
}
