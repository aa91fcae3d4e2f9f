//! Reconciliation inputs describing the project and outputs describing the
//! resulting signing assets.

use std::collections::BTreeMap;

use crate::entitlements::Entitlements;

use super::{MatchedCertificate, Platform, Profile};

/// The signing-relevant shape of a project.
#[derive(Debug, Clone)]
pub struct AppLayout {
    pub team_id: String,
    pub platform: Platform,
    /// Entitlements of every archivable target, keyed by bundle identifier.
    pub archivable_target_bundle_id_to_entitlements: BTreeMap<String, Entitlements>,
    pub ui_test_target_bundle_ids: Vec<String>,
}

/// Signing assets for one distribution type.
#[derive(Debug, Clone)]
pub struct CodesignAssets {
    pub certificate: MatchedCertificate,
    pub archivable_target_profiles_by_bundle_id: BTreeMap<String, Profile>,
    /// Populated for development only, when UI-test targets are signed.
    pub ui_test_target_profiles_by_bundle_id: BTreeMap<String, Profile>,
}
