//! In-memory runtime for tests.

use super::ContainerRuntime;
use crate::error::DiscoveryError;
use crate::types::{ContainerInspection, ContainerSnapshot};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockRuntime {
    pub containers: Vec<ContainerSnapshot>,
    pub inspections: HashMap<String, ContainerInspection>,
    /// Exec output per container id; containers without an entry fail.
    pub exec_outputs: HashMap<String, String>,
    pub fail_list: bool,
    pub failing_inspects: HashSet<String>,
    inspect_calls: Mutex<HashMap<String, usize>>,
    exec_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, snapshot: ContainerSnapshot) -> Self {
        self.containers.push(snapshot);
        self
    }

    pub fn with_inspection(mut self, inspection: ContainerInspection) -> Self {
        self.inspections.insert(inspection.id.clone(), inspection);
        self
    }

    pub fn with_exec_output(mut self, id: &str, output: &str) -> Self {
        self.exec_outputs.insert(id.to_string(), output.to_string());
        self
    }

    pub fn with_failing_inspect(mut self, id: &str) -> Self {
        self.failing_inspects.insert(id.to_string());
        self
    }

    pub fn with_failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn inspect_calls(&self, id: &str) -> usize {
        self.inspect_calls
            .lock()
            .map(|calls| calls.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn exec_calls(&self) -> usize {
        self.exec_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, DiscoveryError> {
        if self.fail_list {
            return Err(DiscoveryError::Exec {
                container_id: String::new(),
                reason: "mock list failure".into(),
            });
        }
        Ok(self.containers.clone())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, DiscoveryError> {
        if let Ok(mut calls) = self.inspect_calls.lock() {
            *calls.entry(id.to_string()).or_default() += 1;
        }
        if self.failing_inspects.contains(id) {
            return Err(DiscoveryError::Exec {
                container_id: id.to_string(),
                reason: "mock inspect failure".into(),
            });
        }
        // Containers without a canned inspection still inspect, with no extra details.
        if let Some(inspection) = self.inspections.get(id) {
            return Ok(inspection.clone());
        }
        if self.containers.iter().any(|c| c.id == id) {
            return Ok(ContainerInspection {
                id: id.to_string(),
                ..Default::default()
            });
        }
        Err(DiscoveryError::Exec {
            container_id: id.to_string(),
            reason: "no such container".into(),
        })
    }

    async fn exec_in_container(&self, id: &str, _cmd: &[&str]) -> Result<String, DiscoveryError> {
        self.exec_calls.fetch_add(1, Ordering::SeqCst);
        self.exec_outputs
            .get(id)
            .cloned()
            .ok_or_else(|| DiscoveryError::Exec {
                container_id: id.to_string(),
                reason: "mock exec failure".into(),
            })
    }
}
