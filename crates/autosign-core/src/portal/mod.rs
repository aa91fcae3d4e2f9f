//! Developer Portal capability set.
//!
//! The reconciliation engine only talks to the portal through the traits in
//! this module. Two backends implement them: the App Store Connect REST API
//! and an in-memory portal used for demo runs and tests.

pub mod app_store_connect;
pub mod demo;
pub mod memory;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BundleId, Capability, CertificateType, Device, DevicePlatform, PortalCertificate, Profile,
    ProfileType,
};

pub use app_store_connect::AppStoreConnectClient;
pub use memory::InMemoryPortal;

/// Message used when a profile disappears between lookup and inspection.
pub const PROFILE_REMOVED_CONCURRENTLY: &str = "profile was concurrently removed from Developer Portal";

/// Certificate lookups.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Finds the portal certificate with the given serial number.
    async fn query_certificate_by_serial(&self, serial: &str) -> Result<Option<PortalCertificate>>;

    /// Lists all development and distribution certificates of the team.
    async fn query_all_certificates(
        &self,
    ) -> Result<HashMap<CertificateType, Vec<PortalCertificate>>>;
}

/// Device listing and registration.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Lists enabled devices, optionally narrowed to one UDID.
    async fn list_devices(&self, udid: Option<&str>, platform: DevicePlatform)
    -> Result<Vec<Device>>;

    /// Registers a device.
    ///
    /// A rejected UDID surfaces as `DeviceRegistrationConflict`.
    async fn register_device(&self, udid: &str, name: &str, platform: DevicePlatform)
    -> Result<Device>;
}

/// Profile and App ID management.
#[async_trait]
pub trait ProfileClient: Send + Sync {
    /// Finds a visible profile by exact name and type.
    ///
    /// Expired profiles are not returned by the portal's name search.
    async fn find_profile(&self, name: &str, profile_type: ProfileType) -> Result<Option<Profile>>;

    /// Deletes a profile. A profile that is already gone is not an error.
    async fn delete_profile(&self, id: &str) -> Result<()>;

    /// Creates a profile bound to an App ID, certificates and devices.
    async fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile>;

    /// Lists every profile of an App ID through its relationship link,
    /// expired ones included.
    async fn list_bundle_id_profiles(&self, bundle_id: &BundleId) -> Result<Vec<Profile>>;

    /// Certificate IDs attached to a profile.
    ///
    /// A missing profile surfaces as `NonMatchingProfile`.
    async fn profile_certificate_ids(&self, profile_id: &str) -> Result<HashSet<String>>;

    /// Device IDs attached to a profile.
    ///
    /// A missing profile surfaces as `NonMatchingProfile`.
    async fn profile_device_ids(&self, profile_id: &str) -> Result<HashSet<String>>;

    /// App ID a profile is bound to.
    ///
    /// A missing profile surfaces as `NonMatchingProfile`.
    async fn profile_bundle_id(&self, profile_id: &str) -> Result<BundleId>;

    /// Finds the App ID with exactly this identifier.
    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>>;

    async fn create_bundle_id(&self, identifier: &str, name: &str) -> Result<BundleId>;

    async fn list_capabilities(&self, bundle_id: &BundleId) -> Result<Vec<Capability>>;

    async fn enable_capability(&self, bundle_id: &BundleId, capability: &Capability) -> Result<()>;
}

/// A complete Developer Portal backend, selected once at startup.
#[derive(Clone)]
pub struct DevPortalClient {
    pub certificate_source: Arc<dyn CertificateSource>,
    pub device_client: Arc<dyn DeviceClient>,
    pub profile_client: Arc<dyn ProfileClient>,
}

impl DevPortalClient {
    pub fn new(
        certificate_source: Arc<dyn CertificateSource>,
        device_client: Arc<dyn DeviceClient>,
        profile_client: Arc<dyn ProfileClient>,
    ) -> Self {
        Self {
            certificate_source,
            device_client,
            profile_client,
        }
    }

    /// Backend talking to the App Store Connect API.
    pub fn app_store_connect(client: AppStoreConnectClient) -> Self {
        let client = Arc::new(client);
        Self::new(client.clone(), client.clone(), client)
    }

    /// Backend holding portal state in memory.
    pub fn in_memory(portal: Arc<InMemoryPortal>) -> Self {
        Self::new(portal.clone(), portal.clone(), portal)
    }
}

/// Picks the App ID whose identifier matches exactly.
///
/// The portal's identifier filter is a substring match.
pub fn select_exact_bundle_id(candidates: Vec<BundleId>, identifier: &str) -> Option<BundleId> {
    candidates
        .into_iter()
        .find(|bundle_id| bundle_id.identifier == identifier)
}
