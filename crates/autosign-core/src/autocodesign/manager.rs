//! Run orchestration across distribution types.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::entitlements::{Entitlements, can_generate_profile_with_entitlements};
use crate::error::{AutosignError, Result};
use crate::models::{
    AppLayout, CodesignAssets, DistributionType, LocalCertificate, ProfileType, TestDevice,
};
use crate::portal::DevPortalClient;

use super::{
    ProfileRequest, RunContext, ensure_profile, ensure_test_devices,
    select_certificates_and_distribution_types, wildcard_bundle_id,
};

/// Parameters of one reconciliation run.
#[derive(Debug, Clone)]
pub struct CodesignRequest {
    pub distribution: DistributionType,
    /// Local certificates with their key material.
    pub certificates: Vec<LocalCertificate>,
    /// Profiles expiring within this many days are regenerated.
    pub min_profile_days_valid: u32,
    pub sign_ui_test_targets: bool,
    pub register_test_devices: bool,
    pub verbose: bool,
}

/// Reconciles code-signing assets against a Developer Portal backend.
pub struct CodesignManager {
    client: DevPortalClient,
    test_devices: Vec<TestDevice>,
}

impl CodesignManager {
    pub fn new(client: DevPortalClient) -> Self {
        Self {
            client,
            test_devices: Vec::new(),
        }
    }

    /// Known test devices, registered when a run asks for it.
    pub fn with_test_devices(mut self, test_devices: Vec<TestDevice>) -> Self {
        self.test_devices = test_devices;
        self
    }

    pub fn client(&self) -> &DevPortalClient {
        &self.client
    }

    pub async fn ensure_codesign_assets(
        &self,
        layout: &AppLayout,
        request: &CodesignRequest,
    ) -> Result<HashMap<DistributionType, CodesignAssets>> {
        self.ensure_codesign_assets_at(layout, request, Utc::now())
            .await
    }

    /// Same as [`ensure_codesign_assets`](Self::ensure_codesign_assets) with
    /// an explicit current time.
    pub async fn ensure_codesign_assets_at(
        &self,
        layout: &AppLayout,
        request: &CodesignRequest,
        now: DateTime<Utc>,
    ) -> Result<HashMap<DistributionType, CodesignAssets>> {
        if let Err(e) =
            can_generate_profile_with_entitlements(&layout.archivable_target_bundle_id_to_entitlements)
        {
            tracing::error!("{}", e);
            return Err(e);
        }

        let sign_ui_test_targets =
            request.sign_ui_test_targets && !layout.ui_test_target_bundle_ids.is_empty();

        tracing::info!("Fetching signing certificates");
        let (certificates_by_type, distribution_types) = select_certificates_and_distribution_types(
            self.client.certificate_source.as_ref(),
            request.certificates.clone(),
            request.distribution,
            &layout.team_id,
            sign_ui_test_targets,
            request.verbose,
            now,
        )
        .await?;

        let mut ctx = RunContext::new();
        let mut device_ids: Option<Vec<String>> = None;
        let mut assets_by_distribution = HashMap::new();

        for distribution in distribution_types {
            tracing::info!("Checking {} provisioning profiles", distribution);

            let certificate_type = distribution.certificate_type();
            let certificates = match certificates_by_type.get(&certificate_type) {
                Some(certificates) if !certificates.is_empty() => certificates,
                _ => {
                    return Err(AutosignError::MissingCertificate {
                        certificate_type,
                        team_id: layout.team_id.clone(),
                    });
                }
            };
            if certificates.len() > 1 {
                tracing::warn!("Multiple certificates provided for distribution type: {}", distribution);
                for certificate in certificates {
                    tracing::warn!("- {}", certificate.certificate.common_name);
                }
                tracing::warn!("Using: {}", certificates[0].certificate.common_name);
            }
            tracing::debug!(
                "Using certificate for distribution type {} (certificate type {}): {}",
                distribution,
                certificate_type,
                certificates[0].certificate.common_name
            );
            let certificate_ids: Vec<String> =
                certificates.iter().map(|c| c.id.clone()).collect();

            let profile_device_ids = if distribution.requires_device_list() {
                if device_ids.is_none() {
                    device_ids = Some(self.device_ids(layout, request).await?);
                }
                device_ids.clone().unwrap_or_default()
            } else {
                Vec::new()
            };

            let profile_type = ProfileType::for_distribution(layout.platform, distribution);
            let mut archivable = BTreeMap::new();
            for (bundle_id, entitlements) in &layout.archivable_target_bundle_id_to_entitlements {
                let profile = ensure_profile(
                    self.client.profile_client.as_ref(),
                    &mut ctx,
                    &ProfileRequest {
                        profile_type,
                        bundle_id,
                        entitlements,
                        certificate_ids: &certificate_ids,
                        device_ids: &profile_device_ids,
                        min_profile_days_valid: request.min_profile_days_valid,
                        now,
                    },
                )
                .await?;
                archivable.insert(bundle_id.clone(), profile);
            }

            let mut ui_tests = BTreeMap::new();
            if distribution == DistributionType::Development && sign_ui_test_targets {
                let no_entitlements = Entitlements::new();
                for bundle_id in &layout.ui_test_target_bundle_ids {
                    let wildcard = wildcard_bundle_id(bundle_id)?;
                    let profile = ensure_profile(
                        self.client.profile_client.as_ref(),
                        &mut ctx,
                        &ProfileRequest {
                            profile_type,
                            bundle_id: &wildcard,
                            entitlements: &no_entitlements,
                            certificate_ids: &certificate_ids,
                            device_ids: &profile_device_ids,
                            min_profile_days_valid: request.min_profile_days_valid,
                            now,
                        },
                    )
                    .await?;
                    ui_tests.insert(bundle_id.clone(), profile);
                }
            }

            assets_by_distribution.insert(
                distribution,
                CodesignAssets {
                    certificate: certificates[0].clone(),
                    archivable_target_profiles_by_bundle_id: archivable,
                    ui_test_target_profiles_by_bundle_id: ui_tests,
                },
            );
        }

        let missing_containers = ctx.missing_containers();
        if !missing_containers.is_empty() {
            tracing::error!("Unable to automatically assign iCloud containers to the following app IDs:");
            for (bundle_id, containers) in missing_containers {
                tracing::warn!("{}, containers:", bundle_id);
                for container in containers {
                    tracing::warn!("- {}", container);
                }
            }
            return Err(AutosignError::MissingICloudContainers(
                missing_containers.clone(),
            ));
        }

        Ok(assets_by_distribution)
    }

    async fn device_ids(&self, layout: &AppLayout, request: &CodesignRequest) -> Result<Vec<String>> {
        let roster: &[TestDevice] = if request.register_test_devices {
            &self.test_devices
        } else {
            &[]
        };
        ensure_test_devices(self.client.device_client.as_ref(), roster, layout.platform).await
    }
}
