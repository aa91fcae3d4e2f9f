//! Per-run reconciliation state.

use std::collections::{BTreeMap, HashMap};

use crate::models::BundleId;

/// State shared by every reconciliation call of one run.
///
/// Created fresh for each run and never shared between runs.
#[derive(Debug, Default)]
pub struct RunContext {
    bundle_ids: HashMap<String, BundleId>,
    missing_containers: BTreeMap<String, Vec<String>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_bundle_id(&self, identifier: &str) -> Option<&BundleId> {
        self.bundle_ids.get(identifier)
    }

    pub fn cache_bundle_id(&mut self, bundle_id: BundleId) {
        self.bundle_ids
            .insert(bundle_id.identifier.clone(), bundle_id);
    }

    /// Records iCloud containers that have to be assigned to an App ID by hand.
    pub fn record_missing_containers(&mut self, identifier: &str, containers: Vec<String>) {
        self.missing_containers
            .insert(identifier.to_string(), containers);
    }

    pub fn missing_containers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.missing_containers
    }
}
