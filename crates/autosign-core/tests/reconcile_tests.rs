//! Reconciliation tests against the in-memory Developer Portal.
//!
//! Each test seeds a portal, runs the engine and asserts on the resulting
//! assets and on the portal calls it made.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use autosign_core::autocodesign::{ProfileRequest, RunContext, ensure_profile, profile_name};
use autosign_core::entitlements::{Entitlements, ICLOUD_CONTAINERS_KEY, ICLOUD_SERVICES_KEY};
use autosign_core::models::{
    AppLayout, BundleId, Capability, CapabilityType, CertificateType, DeviceClass,
    DistributionType, LocalCertificate, Platform, PortalCertificate, Profile, ProfileState,
    ProfileType, TestDevice,
};
use autosign_core::portal::{InMemoryPortal, ProfileClient};
use autosign_core::{AutosignError, CodesignManager, CodesignRequest, DevPortalClient, Result};
use chrono::{DateTime, Duration, Utc};

const TEAM_ID: &str = "ABCDE12345";
const APP: &str = "com.acme.app";

struct Fixture {
    portal: Arc<InMemoryPortal>,
    development: PortalCertificate,
    distribution: PortalCertificate,
    phone_id: String,
}

impl Fixture {
    fn new() -> Self {
        let portal = Arc::new(InMemoryPortal::new(TEAM_ID));
        let development = portal.add_certificate(
            "Apple Development: Jane Doe",
            "1A2B",
            CertificateType::Development,
        );
        let distribution = portal.add_certificate(
            "Apple Distribution: Acme Inc",
            "3C4D",
            CertificateType::Distribution,
        );
        let phone = portal.add_device("00008030-000A1B2C3D4E5F60", "Jane's iPhone", DeviceClass::Iphone);
        Self {
            portal,
            development,
            distribution,
            phone_id: phone.id,
        }
    }

    fn manager(&self) -> CodesignManager {
        CodesignManager::new(DevPortalClient::in_memory(self.portal.clone()))
    }

    /// An existing App ID with push notifications enabled.
    fn push_bundle_id(&self, identifier: &str) -> BundleId {
        let bundle_id = self.portal.add_bundle_id(identifier);
        self.portal
            .add_capability(&bundle_id, Capability::new(CapabilityType::PushNotifications))
            .unwrap();
        bundle_id
    }

    fn seed_development_profile(
        &self,
        bundle_id: &BundleId,
        device_ids: &[String],
        expiration_date: DateTime<Utc>,
    ) -> Profile {
        self.portal
            .add_profile(
                &profile_name(ProfileType::IosAppDevelopment, &bundle_id.identifier),
                ProfileType::IosAppDevelopment,
                bundle_id,
                &[self.development.id.clone()],
                device_ids,
                expiration_date,
            )
            .unwrap()
    }
}

fn local_certificate(common_name: &str, serial: &str) -> LocalCertificate {
    let now = Utc::now();
    LocalCertificate {
        common_name: common_name.to_string(),
        team_id: TEAM_ID.to_string(),
        team_name: "Acme Inc".to_string(),
        serial_number: serial.to_string(),
        not_before: now - Duration::days(10),
        not_after: now + Duration::days(300),
        identity: None,
    }
}

fn push_entitlements() -> Entitlements {
    let mut entitlements = Entitlements::new();
    entitlements.insert("aps-environment", plist::Value::String("development".into()));
    entitlements
}

fn icloud_entitlements(container: &str) -> Entitlements {
    let mut entitlements = Entitlements::new();
    entitlements.insert(
        ICLOUD_SERVICES_KEY,
        plist::Value::Array(vec![plist::Value::String("CloudKit".into())]),
    );
    entitlements.insert(
        ICLOUD_CONTAINERS_KEY,
        plist::Value::Array(vec![plist::Value::String(container.into())]),
    );
    entitlements
}

fn layout(targets: Vec<(&str, Entitlements)>) -> AppLayout {
    AppLayout {
        team_id: TEAM_ID.to_string(),
        platform: Platform::Ios,
        archivable_target_bundle_id_to_entitlements: targets
            .into_iter()
            .map(|(bundle_id, entitlements)| (bundle_id.to_string(), entitlements))
            .collect::<BTreeMap<_, _>>(),
        ui_test_target_bundle_ids: Vec::new(),
    }
}

fn request(distribution: DistributionType) -> CodesignRequest {
    CodesignRequest {
        distribution,
        certificates: vec![
            local_certificate("Apple Development: Jane Doe", "1A2B"),
            local_certificate("Apple Distribution: Acme Inc", "3C4D"),
        ],
        min_profile_days_valid: 0,
        sign_ui_test_targets: false,
        register_test_devices: false,
        verbose: false,
    }
}

// =============================================================================
// Profile Reconciliation Tests
// =============================================================================

mod profiles {
    use super::*;

    #[tokio::test]
    async fn second_run_reuses_profile_without_mutations() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let layout = layout(vec![(APP, push_entitlements())]);

        let first = manager
            .ensure_codesign_assets(&layout, &request(DistributionType::Development))
            .await
            .unwrap();
        let mutations_after_first = fixture.portal.mutation_count();
        assert_eq!(fixture.portal.call_count("create_bundle_id"), 1);
        assert_eq!(fixture.portal.call_count("create_profile"), 1);

        let second = manager
            .ensure_codesign_assets(&layout, &request(DistributionType::Development))
            .await
            .unwrap();

        let first_profile = &first[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        let second_profile = &second[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_eq!(first_profile.id, second_profile.id);
        assert_eq!(fixture.portal.mutation_count(), mutations_after_first);
    }

    #[tokio::test]
    async fn profile_missing_a_device_is_regenerated() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let stale = fixture.seed_development_profile(&bundle_id, &[], Utc::now() + Duration::days(200));

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, stale.id);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
        assert_eq!(fixture.portal.call_count("create_bundle_id"), 0);

        let device_ids = fixture.portal.profile_device_ids(&profile.id).await.unwrap();
        assert!(device_ids.contains(&fixture.phone_id));
        let certificate_ids = fixture.portal.profile_certificate_ids(&profile.id).await.unwrap();
        assert!(certificate_ids.contains(&fixture.development.id));
    }

    #[tokio::test]
    async fn profile_with_extra_devices_is_kept() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone(), "retired-device".to_string()],
            Utc::now() + Duration::days(200),
        );

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_eq!(profile.id, existing.id);
        assert_eq!(fixture.portal.mutation_count(), 0);
    }

    #[tokio::test]
    async fn invalid_profile_is_regenerated() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() + Duration::days(200),
        );
        fixture.portal.set_profile_state(&existing.id, ProfileState::Invalid);

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, existing.id);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
        assert!(fixture.portal.profiles().iter().all(|p| p.id != existing.id));
    }

    #[tokio::test]
    async fn profile_in_unknown_state_is_regenerated_without_inspection() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() + Duration::days(200),
        );
        fixture.portal.set_profile_state(&existing.id, ProfileState::Unknown);

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, existing.id);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
        assert_eq!(fixture.portal.call_count("create_profile"), 1);
        assert_eq!(fixture.portal.call_count("profile_certificate_ids"), 0);
        assert_eq!(fixture.portal.call_count("profile_device_ids"), 0);
    }

    #[tokio::test]
    async fn profile_expiring_at_the_boundary_is_regenerated() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            now + Duration::days(30),
        );
        let mut run = request(DistributionType::Development);
        run.min_profile_days_valid = 30;

        let assets = fixture
            .manager()
            .ensure_codesign_assets_at(&layout(vec![(APP, push_entitlements())]), &run, now)
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, existing.id);
    }

    #[tokio::test]
    async fn profile_valid_past_the_boundary_is_kept() {
        let fixture = Fixture::new();
        let now = Utc::now();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            now + Duration::days(31),
        );
        let mut run = request(DistributionType::Development);
        run.min_profile_days_valid = 30;

        let assets = fixture
            .manager()
            .ensure_codesign_assets_at(&layout(vec![(APP, push_entitlements())]), &run, now)
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_eq!(profile.id, existing.id);
    }

    #[tokio::test]
    async fn app_store_profiles_carry_no_devices() {
        let fixture = Fixture::new();
        let mut run = request(DistributionType::AppStore);
        run.certificates = vec![local_certificate("Apple Distribution: Acme Inc", "3C4D")];
        let mut tv_layout = layout(vec![("com.acme.tv", Entitlements::new())]);
        tv_layout.platform = Platform::TvOs;

        let assets = fixture
            .manager()
            .ensure_codesign_assets(&tv_layout, &run)
            .await
            .unwrap();

        assert_eq!(assets.len(), 1);
        let store = &assets[&DistributionType::AppStore];
        assert_eq!(store.certificate.id, fixture.distribution.id);
        let profile = &store.archivable_target_profiles_by_bundle_id["com.acme.tv"];
        assert_eq!(profile.profile_type, ProfileType::TvosAppStore);
        assert_eq!(profile.name, "Bitrise tvOS app-store - (com.acme.tv)");
        assert_eq!(fixture.portal.call_count("list_devices"), 0);
        assert!(fixture.portal.profile_device_ids(&profile.id).await.unwrap().is_empty());
    }
}

// =============================================================================
// Duplicate Name Race Tests
// =============================================================================

/// Profile client whose credentials stop working after the first profile
/// creation attempt.
struct RevokedOnRetry {
    portal: Arc<InMemoryPortal>,
    creations: AtomicUsize,
}

#[async_trait]
impl ProfileClient for RevokedOnRetry {
    async fn find_profile(&self, name: &str, profile_type: ProfileType) -> Result<Option<Profile>> {
        self.portal.find_profile(name, profile_type).await
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        self.portal.delete_profile(id).await
    }

    async fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile> {
        if self.creations.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(AutosignError::Unauthorized("API key revoked".to_string()));
        }
        self.portal
            .create_profile(name, profile_type, bundle_id, certificate_ids, device_ids)
            .await
    }

    async fn list_bundle_id_profiles(&self, bundle_id: &BundleId) -> Result<Vec<Profile>> {
        self.portal.list_bundle_id_profiles(bundle_id).await
    }

    async fn profile_certificate_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.portal.profile_certificate_ids(profile_id).await
    }

    async fn profile_device_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.portal.profile_device_ids(profile_id).await
    }

    async fn profile_bundle_id(&self, profile_id: &str) -> Result<BundleId> {
        self.portal.profile_bundle_id(profile_id).await
    }

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>> {
        self.portal.find_bundle_id(identifier).await
    }

    async fn create_bundle_id(&self, identifier: &str, name: &str) -> Result<BundleId> {
        self.portal.create_bundle_id(identifier, name).await
    }

    async fn list_capabilities(&self, bundle_id: &BundleId) -> Result<Vec<Capability>> {
        self.portal.list_capabilities(bundle_id).await
    }

    async fn enable_capability(&self, bundle_id: &BundleId, capability: &Capability) -> Result<()> {
        self.portal.enable_capability(bundle_id, capability).await
    }
}

mod duplicate_name {
    use super::*;

    #[tokio::test]
    async fn retry_failure_other_than_conflict_is_returned_as_is() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let expired = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() - Duration::days(1),
        );
        fixture.portal.hide_profile(&expired.id);
        let client = RevokedOnRetry {
            portal: fixture.portal.clone(),
            creations: AtomicUsize::new(0),
        };
        let entitlements = push_entitlements();
        let certificate_ids = vec![fixture.development.id.clone()];
        let device_ids = vec![fixture.phone_id.clone()];
        let mut ctx = RunContext::new();

        let err = ensure_profile(
            &client,
            &mut ctx,
            &ProfileRequest {
                profile_type: ProfileType::IosAppDevelopment,
                bundle_id: APP,
                entitlements: &entitlements,
                certificate_ids: &certificate_ids,
                device_ids: &device_ids,
                min_profile_days_valid: 0,
                now: Utc::now(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AutosignError::Unauthorized(_)));
        assert_eq!(client.creations.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
    }

    #[tokio::test]
    async fn expired_duplicate_is_removed_and_creation_retried() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let expired = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() - Duration::days(1),
        );
        fixture.portal.hide_profile(&expired.id);

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, expired.id);
        assert_eq!(fixture.portal.call_count("create_profile"), 2);
        assert_eq!(fixture.portal.call_count("list_bundle_id_profiles"), 1);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
        assert!(fixture.portal.profiles().iter().all(|p| p.id != expired.id));
    }

    #[tokio::test]
    async fn second_conflict_is_fatal() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let expired = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() - Duration::days(1),
        );
        fixture.portal.hide_profile(&expired.id);
        fixture.portal.inject_duplicate_name_conflicts(2);

        let err = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AutosignError::ProfileRetryExhausted { .. }));
        assert_eq!(fixture.portal.call_count("create_profile"), 2);
    }
}

// =============================================================================
// Certificate Tests
// =============================================================================

mod certificates {
    use super::*;

    #[tokio::test]
    async fn only_portal_known_certificates_are_attached() {
        let fixture = Fixture::new();
        let mut run = request(DistributionType::Development);
        run.certificates = vec![
            local_certificate("Apple Development: Jane Doe", "1A2B"),
            local_certificate("Apple Development: John Roe", "9999"),
        ];

        let assets = fixture
            .manager()
            .ensure_codesign_assets(&layout(vec![(APP, push_entitlements())]), &run)
            .await
            .unwrap();

        let development = &assets[&DistributionType::Development];
        assert_eq!(development.certificate.id, fixture.development.id);
        let profile = &development.archivable_target_profiles_by_bundle_id[APP];
        let attached = fixture.portal.profile_certificate_ids(&profile.id).await.unwrap();
        assert_eq!(attached, HashSet::from([fixture.development.id.clone()]));
    }

    #[tokio::test]
    async fn missing_required_certificate_aborts_before_mutations() {
        let fixture = Fixture::new();
        let mut run = request(DistributionType::AdHoc);
        run.certificates = vec![local_certificate("Apple Development: Jane Doe", "1A2B")];

        let err = fixture
            .manager()
            .ensure_codesign_assets(&layout(vec![(APP, push_entitlements())]), &run)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AutosignError::MissingCertificate {
                certificate_type: CertificateType::Distribution,
                ..
            }
        ));
        assert_eq!(fixture.portal.mutation_count(), 0);
    }

    #[tokio::test]
    async fn ui_test_signing_without_ui_test_targets_needs_no_development_certificate() {
        let fixture = Fixture::new();
        let mut run = request(DistributionType::AppStore);
        run.certificates = vec![local_certificate("Apple Distribution: Acme Inc", "3C4D")];
        run.sign_ui_test_targets = true;

        let assets = fixture
            .manager()
            .ensure_codesign_assets(&layout(vec![(APP, push_entitlements())]), &run)
            .await
            .unwrap();

        assert_eq!(assets.len(), 1);
        assert_eq!(
            assets[&DistributionType::AppStore].certificate.id,
            fixture.distribution.id
        );
        assert_eq!(fixture.portal.call_count("list_devices"), 0);
    }

    #[tokio::test]
    async fn ad_hoc_run_also_reconciles_development() {
        let fixture = Fixture::new();

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements())]),
                &request(DistributionType::AdHoc),
            )
            .await
            .unwrap();

        assert_eq!(assets.len(), 2);
        assert_eq!(
            assets[&DistributionType::AdHoc].certificate.id,
            fixture.distribution.id
        );
        assert_eq!(
            assets[&DistributionType::Development].certificate.id,
            fixture.development.id
        );
        assert_eq!(fixture.portal.call_count("create_bundle_id"), 1);
        assert_eq!(fixture.portal.call_count("list_devices"), 1);
    }
}

// =============================================================================
// Pre-flight & Wildcard Tests
// =============================================================================

mod preflight {
    use super::*;

    #[tokio::test]
    async fn unsupported_entitlement_aborts_before_any_portal_call() {
        let fixture = Fixture::new();
        let mut carplay = push_entitlements();
        carplay.insert("com.apple.developer.carplay-maps", plist::Value::Boolean(true));

        let err = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, push_entitlements()), ("com.acme.app.car", carplay)]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap_err();

        match err {
            AutosignError::UnsupportedEntitlement {
                entitlement,
                bundle_id,
            } => {
                assert_eq!(entitlement, "com.apple.developer.carplay-maps");
                assert_eq!(bundle_id, "com.acme.app.car");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fixture.portal.call_count("create_bundle_id"), 0);
        assert_eq!(fixture.portal.call_count("create_profile"), 0);
        assert_eq!(fixture.portal.call_count("query_certificate_by_serial"), 0);
    }

    #[tokio::test]
    async fn ui_test_targets_get_wildcard_profiles() {
        let fixture = Fixture::new();
        let mut app_layout = layout(vec![(APP, push_entitlements())]);
        app_layout.ui_test_target_bundle_ids = vec!["com.acme.app.uitests".to_string()];
        let mut run = request(DistributionType::AppStore);
        run.sign_ui_test_targets = true;

        let assets = fixture
            .manager()
            .ensure_codesign_assets(&app_layout, &run)
            .await
            .unwrap();

        let development = &assets[&DistributionType::Development];
        let profile = &development.ui_test_target_profiles_by_bundle_id["com.acme.app.uitests"];
        assert_eq!(profile.name, "Wildcard Bitrise iOS development - (com.acme.app)");
        assert!(
            fixture
                .portal
                .bundle_ids()
                .iter()
                .any(|b| b.identifier == "com.acme.app.*" && b.name == "Wildcard Bitrise com acme app")
        );
        assert!(
            assets[&DistributionType::AppStore]
                .ui_test_target_profiles_by_bundle_id
                .is_empty()
        );
    }
}

// =============================================================================
// iCloud & Device Tests
// =============================================================================

mod icloud_and_devices {
    use super::*;

    #[tokio::test]
    async fn missing_containers_are_reported_together() {
        let fixture = Fixture::new();
        let app_layout = layout(vec![
            (APP, icloud_entitlements("iCloud.com.acme.app")),
            ("com.acme.app.widget", icloud_entitlements("iCloud.com.acme.widget")),
        ]);

        let err = fixture
            .manager()
            .ensure_codesign_assets(&app_layout, &request(DistributionType::Development))
            .await
            .unwrap_err();

        match err {
            AutosignError::MissingICloudContainers(containers) => {
                assert_eq!(containers.len(), 2);
                assert_eq!(containers[APP], vec!["iCloud.com.acme.app".to_string()]);
                assert_eq!(
                    containers["com.acme.app.widget"],
                    vec!["iCloud.com.acme.widget".to_string()]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fixture.portal.call_count("create_profile"), 2);
    }

    #[tokio::test]
    async fn profile_without_assigned_container_is_regenerated() {
        let fixture = Fixture::new();
        let bundle_id = fixture.portal.add_bundle_id(APP);
        fixture
            .portal
            .add_capability(
                &bundle_id,
                Capability::new(CapabilityType::Icloud).with_setting("ICLOUD_VERSION", "XCODE_6"),
            )
            .unwrap();
        let stale = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() + Duration::days(200),
        );
        fixture
            .portal
            .assign_icloud_containers(&bundle_id, &["iCloud.com.acme.app"])
            .unwrap();

        let assets = fixture
            .manager()
            .ensure_codesign_assets(
                &layout(vec![(APP, icloud_entitlements("iCloud.com.acme.app"))]),
                &request(DistributionType::Development),
            )
            .await
            .unwrap();

        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        assert_ne!(profile.id, stale.id);
        assert_eq!(fixture.portal.call_count("create_bundle_id"), 0);
    }

    #[tokio::test]
    async fn rejected_test_device_does_not_block_the_run() {
        let fixture = Fixture::new();
        fixture.portal.reject_udid("not-a-udid");
        let manager = fixture.manager().with_test_devices(vec![
            TestDevice {
                udid: "not-a-udid".to_string(),
                title: "Broken".to_string(),
                device_type: "ios".to_string(),
            },
            TestDevice {
                udid: "00008101-000B2C3D4E5F6071".to_string(),
                title: "QA iPad".to_string(),
                device_type: "ios".to_string(),
            },
        ]);
        let mut run = request(DistributionType::Development);
        run.register_test_devices = true;

        let assets = manager
            .ensure_codesign_assets(&layout(vec![(APP, push_entitlements())]), &run)
            .await
            .unwrap();

        assert_eq!(fixture.portal.call_count("register_device"), 2);
        let profile = &assets[&DistributionType::Development].archivable_target_profiles_by_bundle_id[APP];
        let device_ids = fixture.portal.profile_device_ids(&profile.id).await.unwrap();
        assert_eq!(device_ids.len(), 2);
        assert!(device_ids.contains(&fixture.phone_id));
    }
}

// =============================================================================
// Concurrent Removal Tests
// =============================================================================

/// Profile client whose name search returns a profile and removes it right
/// after, as another actor deleting it would.
struct RemovedAfterLookup {
    portal: Arc<InMemoryPortal>,
}

#[async_trait]
impl ProfileClient for RemovedAfterLookup {
    async fn find_profile(&self, name: &str, profile_type: ProfileType) -> Result<Option<Profile>> {
        let found = self.portal.find_profile(name, profile_type).await?;
        if let Some(profile) = &found {
            self.portal.remove_profile(&profile.id);
        }
        Ok(found)
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        self.portal.delete_profile(id).await
    }

    async fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile> {
        self.portal
            .create_profile(name, profile_type, bundle_id, certificate_ids, device_ids)
            .await
    }

    async fn list_bundle_id_profiles(&self, bundle_id: &BundleId) -> Result<Vec<Profile>> {
        self.portal.list_bundle_id_profiles(bundle_id).await
    }

    async fn profile_certificate_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.portal.profile_certificate_ids(profile_id).await
    }

    async fn profile_device_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.portal.profile_device_ids(profile_id).await
    }

    async fn profile_bundle_id(&self, profile_id: &str) -> Result<BundleId> {
        self.portal.profile_bundle_id(profile_id).await
    }

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>> {
        self.portal.find_bundle_id(identifier).await
    }

    async fn create_bundle_id(&self, identifier: &str, name: &str) -> Result<BundleId> {
        self.portal.create_bundle_id(identifier, name).await
    }

    async fn list_capabilities(&self, bundle_id: &BundleId) -> Result<Vec<Capability>> {
        self.portal.list_capabilities(bundle_id).await
    }

    async fn enable_capability(&self, bundle_id: &BundleId, capability: &Capability) -> Result<()> {
        self.portal.enable_capability(bundle_id, capability).await
    }
}

mod concurrent_removal {
    use super::*;

    #[tokio::test]
    async fn profile_removed_during_check_is_regenerated() {
        let fixture = Fixture::new();
        let bundle_id = fixture.push_bundle_id(APP);
        let existing = fixture.seed_development_profile(
            &bundle_id,
            &[fixture.phone_id.clone()],
            Utc::now() + Duration::days(200),
        );
        let client = RemovedAfterLookup {
            portal: fixture.portal.clone(),
        };
        let entitlements = push_entitlements();
        let certificate_ids = vec![fixture.development.id.clone()];
        let device_ids = vec![fixture.phone_id.clone()];
        let mut ctx = RunContext::new();

        let profile = ensure_profile(
            &client,
            &mut ctx,
            &ProfileRequest {
                profile_type: ProfileType::IosAppDevelopment,
                bundle_id: APP,
                entitlements: &entitlements,
                certificate_ids: &certificate_ids,
                device_ids: &device_ids,
                min_profile_days_valid: 0,
                now: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert_ne!(profile.id, existing.id);
        assert_eq!(fixture.portal.call_count("delete_profile"), 1);
        assert_eq!(fixture.portal.call_count("create_profile"), 1);
    }
}
