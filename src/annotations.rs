//! Flattening of container labels and environment into one annotation map.

use std::collections::BTreeMap;

use crate::types::{ContainerInspection, ContainerSnapshot};

/// Substring marking an annotation key as a discovery directive.
pub const DISCOVERY_MARKER: &str = "flexDiscovery";

/// Merges labels, then inspected labels, then `KEY=VALUE` environment
/// entries.  Later sources overwrite earlier ones on key collision and
/// environment entries without `=` are skipped.
pub fn merge_annotations(
    snapshot: &ContainerSnapshot,
    inspection: Option<&ContainerInspection>,
) -> BTreeMap<String, String> {
    let mut merged = snapshot.labels.clone();
    if let Some(inspection) = inspection {
        merged.extend(
            inspection
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged.extend(inspection.env.iter().filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        }));
    }
    merged
}

/// Annotation entries whose key carries the discovery marker, in key order.
pub fn discovery_entries(
    annotations: &BTreeMap<String, String>,
) -> impl Iterator<Item = (&str, &str)> {
    annotations
        .iter()
        .filter(|(k, _)| k.contains(DISCOVERY_MARKER))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}
