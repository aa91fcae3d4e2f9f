//! In-memory Developer Portal.
//!
//! Models the parts of the portal the reconciler depends on, including the
//! behaviours it has to defend against: expired profiles that are hidden from
//! the name search but still block their name, relationship lookups on
//! profiles removed by someone else, and rejected device registrations.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::entitlements::ICLOUD_CONTAINERS_KEY;
use crate::error::{AutosignError, Result};
use crate::models::{
    BundleId, Capability, CertificateType, Device, DeviceClass, DevicePlatform, DeviceStatus,
    PortalCertificate, Profile, ProfileState, ProfileType, normalize_serial,
};

use super::{
    CertificateSource, DeviceClient, PROFILE_REMOVED_CONCURRENTLY, ProfileClient,
    select_exact_bundle_id,
};

/// Operations that change portal state.
const MUTATING_OPERATIONS: [&str; 5] = [
    "create_bundle_id",
    "enable_capability",
    "create_profile",
    "delete_profile",
    "register_device",
];

struct StoredBundleId {
    bundle_id: BundleId,
    capabilities: Vec<Capability>,
    icloud_containers: Vec<String>,
}

struct StoredProfile {
    profile: Profile,
    bundle_id: String,
    certificate_ids: HashSet<String>,
    device_ids: HashSet<String>,
    /// Hidden from the name search, like expired profiles on the real portal.
    hidden: bool,
}

#[derive(Default)]
struct PortalState {
    next_id: u64,
    certificates: Vec<PortalCertificate>,
    bundle_ids: Vec<StoredBundleId>,
    profiles: Vec<StoredProfile>,
    devices: Vec<Device>,
    rejected_udids: HashSet<String>,
    pending_name_conflicts: usize,
    calls: HashMap<&'static str, usize>,
}

impl PortalState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn record(&mut self, operation: &'static str) {
        *self.calls.entry(operation).or_default() += 1;
    }

    fn bundle_id_mut(&mut self, id: &str) -> Result<&mut StoredBundleId> {
        self.bundle_ids
            .iter_mut()
            .find(|stored| stored.bundle_id.id == id)
            .ok_or_else(|| not_found(format!("bundle ID {} does not exist", id)))
    }

    fn profile(&self, id: &str) -> Result<&StoredProfile> {
        self.profiles
            .iter()
            .find(|stored| stored.profile.id == id)
            .ok_or_else(|| AutosignError::NonMatchingProfile(PROFILE_REMOVED_CONCURRENTLY.to_string()))
    }
}

/// Developer Portal backed by in-process state.
pub struct InMemoryPortal {
    team_id: String,
    profile_validity: Duration,
    state: Mutex<PortalState>,
}

impl InMemoryPortal {
    /// Creates an empty portal for a team. Created profiles are valid for a year.
    pub fn new(team_id: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            profile_validity: Duration::days(365),
            state: Mutex::new(PortalState::default()),
        }
    }

    pub fn with_profile_validity(mut self, validity: Duration) -> Self {
        self.profile_validity = validity;
        self
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    fn state(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub fn add_certificate(
        &self,
        name: &str,
        serial_number: &str,
        certificate_type: CertificateType,
    ) -> PortalCertificate {
        let mut state = self.state();
        let certificate = PortalCertificate {
            id: state.next_id("certificate"),
            name: name.to_string(),
            serial_number: normalize_serial(serial_number),
            certificate_type,
            expiration_date: None,
        };
        state.certificates.push(certificate.clone());
        certificate
    }

    pub fn add_device(&self, udid: &str, name: &str, device_class: DeviceClass) -> Device {
        let mut state = self.state();
        let platform = match device_class {
            DeviceClass::Mac => DevicePlatform::MacOs,
            _ => DevicePlatform::Ios,
        };
        let device = Device {
            id: state.next_id("device"),
            udid: udid.to_string(),
            name: name.to_string(),
            device_class,
            platform,
            status: DeviceStatus::Enabled,
        };
        state.devices.push(device.clone());
        device
    }

    pub fn add_bundle_id(&self, identifier: &str) -> BundleId {
        let mut state = self.state();
        let bundle_id = BundleId {
            id: state.next_id("bundle"),
            identifier: identifier.to_string(),
            name: identifier.to_string(),
        };
        state.bundle_ids.push(StoredBundleId {
            bundle_id: bundle_id.clone(),
            capabilities: Vec::new(),
            icloud_containers: Vec::new(),
        });
        bundle_id
    }

    pub fn add_capability(&self, bundle_id: &BundleId, capability: Capability) -> Result<()> {
        let mut state = self.state();
        let stored = state.bundle_id_mut(&bundle_id.id)?;
        upsert_capability(&mut stored.capabilities, capability);
        Ok(())
    }

    /// Assigns iCloud containers to an App ID, the step that can only be
    /// done by hand on the real portal.
    pub fn assign_icloud_containers(&self, bundle_id: &BundleId, containers: &[&str]) -> Result<()> {
        let mut state = self.state();
        let stored = state.bundle_id_mut(&bundle_id.id)?;
        stored.icloud_containers = containers.iter().map(|c| c.to_string()).collect();
        Ok(())
    }

    /// Inserts an existing profile without going through `create_profile`.
    pub fn add_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
        expiration_date: DateTime<Utc>,
    ) -> Result<Profile> {
        let mut state = self.state();
        self.insert_profile(
            &mut state,
            name,
            profile_type,
            bundle_id,
            certificate_ids,
            device_ids,
            expiration_date,
        )
    }

    pub fn set_profile_state(&self, id: &str, profile_state: ProfileState) {
        let mut state = self.state();
        if let Some(stored) = state.profiles.iter_mut().find(|p| p.profile.id == id) {
            stored.profile.state = profile_state;
        }
    }

    /// Hides a profile from the name search, as the portal does once a
    /// profile expires.
    pub fn hide_profile(&self, id: &str) {
        let mut state = self.state();
        if let Some(stored) = state.profiles.iter_mut().find(|p| p.profile.id == id) {
            stored.hidden = true;
        }
    }

    /// Removes a profile behind the reconciler's back.
    pub fn remove_profile(&self, id: &str) {
        self.state().profiles.retain(|p| p.profile.id != id);
    }

    /// Makes registration of this UDID fail with a conflict.
    pub fn reject_udid(&self, udid: &str) {
        self.state().rejected_udids.insert(udid.to_lowercase());
    }

    /// Makes the next `count` profile creations fail with a duplicate-name conflict.
    pub fn inject_duplicate_name_conflicts(&self, count: usize) {
        self.state().pending_name_conflicts = count;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of calls that changed portal state.
    pub fn mutation_count(&self) -> usize {
        let state = self.state();
        MUTATING_OPERATIONS
            .iter()
            .map(|op| state.calls.get(op).copied().unwrap_or(0))
            .sum()
    }

    /// Every stored profile, hidden ones included.
    pub fn profiles(&self) -> Vec<Profile> {
        self.state()
            .profiles
            .iter()
            .map(|stored| stored.profile.clone())
            .collect()
    }

    pub fn bundle_ids(&self) -> Vec<BundleId> {
        self.state()
            .bundle_ids
            .iter()
            .map(|stored| stored.bundle_id.clone())
            .collect()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state().devices.clone()
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_profile(
        &self,
        state: &mut PortalState,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
        expiration_date: DateTime<Utc>,
    ) -> Result<Profile> {
        let containers = state.bundle_id_mut(&bundle_id.id)?.icloud_containers.clone();
        let id = state.next_id("profile");
        let uuid = format!("00000000-0000-4000-8000-{:012X}", state.next_id);
        let content = profile_content(
            &self.team_id,
            &uuid,
            name,
            &bundle_id.identifier,
            &containers,
            expiration_date,
        )?;
        let profile = Profile {
            id,
            name: name.to_string(),
            uuid,
            profile_type,
            state: ProfileState::Active,
            expiration_date,
            content,
        };
        state.profiles.push(StoredProfile {
            profile: profile.clone(),
            bundle_id: bundle_id.id.clone(),
            certificate_ids: certificate_ids.iter().cloned().collect(),
            device_ids: device_ids.iter().cloned().collect(),
            hidden: false,
        });
        Ok(profile)
    }
}

fn not_found(message: String) -> AutosignError {
    AutosignError::Api {
        status: 404,
        message,
    }
}

fn duplicate_name(name: &str) -> AutosignError {
    AutosignError::Api {
        status: 409,
        message: format!(
            "There is a problem with the request entity: Multiple profiles found with the name '{}'. \
             Please remove the duplicate profiles and try again.",
            name
        ),
    }
}

fn upsert_capability(capabilities: &mut Vec<Capability>, capability: Capability) {
    match capabilities
        .iter_mut()
        .find(|c| c.capability_type == capability.capability_type)
    {
        Some(existing) => *existing = capability,
        None => capabilities.push(capability),
    }
}

/// Builds profile content shaped like a signed profile: an XML property list
/// wrapped in opaque envelope bytes.
fn profile_content(
    team_id: &str,
    uuid: &str,
    name: &str,
    identifier: &str,
    icloud_containers: &[String],
    expiration_date: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let mut entitlements = plist::Dictionary::new();
    entitlements.insert(
        "application-identifier".to_string(),
        plist::Value::String(format!("{}.{}", team_id, identifier)),
    );
    entitlements.insert(
        "com.apple.developer.team-identifier".to_string(),
        plist::Value::String(team_id.to_string()),
    );
    if !icloud_containers.is_empty() {
        entitlements.insert(
            ICLOUD_CONTAINERS_KEY.to_string(),
            plist::Value::Array(
                icloud_containers
                    .iter()
                    .map(|c| plist::Value::String(c.clone()))
                    .collect(),
            ),
        );
    }

    let mut dict = plist::Dictionary::new();
    dict.insert("Name".to_string(), plist::Value::String(name.to_string()));
    dict.insert("UUID".to_string(), plist::Value::String(uuid.to_string()));
    dict.insert(
        "TeamIdentifier".to_string(),
        plist::Value::Array(vec![plist::Value::String(team_id.to_string())]),
    );
    dict.insert(
        "ExpirationDate".to_string(),
        plist::Value::Date(SystemTime::from(expiration_date).into()),
    );
    dict.insert("Entitlements".to_string(), plist::Value::Dictionary(entitlements));

    let mut content = b"0\x82\x10\x00\x06\x09*\x86H\x86\xf7\r\x01\x07\x02".to_vec();
    plist::to_writer_xml(&mut content, &plist::Value::Dictionary(dict))?;
    content.extend_from_slice(b"\xa0\x82\x0b\x00");
    Ok(content)
}

fn udid_key(udid: &str) -> String {
    udid.replace('-', "").to_lowercase()
}

#[async_trait]
impl CertificateSource for InMemoryPortal {
    async fn query_certificate_by_serial(&self, serial: &str) -> Result<Option<PortalCertificate>> {
        let mut state = self.state();
        state.record("query_certificate_by_serial");
        let serial = normalize_serial(serial);
        Ok(state
            .certificates
            .iter()
            .find(|c| c.serial_number == serial)
            .cloned())
    }

    async fn query_all_certificates(
        &self,
    ) -> Result<HashMap<CertificateType, Vec<PortalCertificate>>> {
        let mut state = self.state();
        state.record("query_all_certificates");
        let mut by_type: HashMap<CertificateType, Vec<PortalCertificate>> = HashMap::new();
        for certificate in &state.certificates {
            by_type
                .entry(certificate.certificate_type)
                .or_default()
                .push(certificate.clone());
        }
        Ok(by_type)
    }
}

#[async_trait]
impl DeviceClient for InMemoryPortal {
    async fn list_devices(
        &self,
        udid: Option<&str>,
        platform: DevicePlatform,
    ) -> Result<Vec<Device>> {
        let mut state = self.state();
        state.record("list_devices");
        Ok(state
            .devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Enabled && d.platform == platform)
            .filter(|d| udid.is_none_or(|udid| d.udid.eq_ignore_ascii_case(udid)))
            .cloned()
            .collect())
    }

    async fn register_device(
        &self,
        udid: &str,
        name: &str,
        platform: DevicePlatform,
    ) -> Result<Device> {
        let mut state = self.state();
        state.record("register_device");

        if state.rejected_udids.contains(&udid.to_lowercase()) {
            return Err(AutosignError::DeviceRegistrationConflict {
                udid: udid.to_string(),
                reason: "An attempt was made to register a device with an invalid UDID".to_string(),
            });
        }
        if state.devices.iter().any(|d| udid_key(&d.udid) == udid_key(udid)) {
            return Err(AutosignError::DeviceRegistrationConflict {
                udid: udid.to_string(),
                reason: "A device with this UDID is already registered".to_string(),
            });
        }

        let device = Device {
            id: state.next_id("device"),
            udid: udid.to_string(),
            name: name.to_string(),
            device_class: DeviceClass::Iphone,
            platform,
            status: DeviceStatus::Enabled,
        };
        state.devices.push(device.clone());
        Ok(device)
    }
}

#[async_trait]
impl ProfileClient for InMemoryPortal {
    async fn find_profile(&self, name: &str, profile_type: ProfileType) -> Result<Option<Profile>> {
        let mut state = self.state();
        state.record("find_profile");
        Ok(state
            .profiles
            .iter()
            .find(|p| !p.hidden && p.profile.name == name && p.profile.profile_type == profile_type)
            .map(|p| p.profile.clone()))
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.record("delete_profile");
        state.profiles.retain(|p| p.profile.id != id);
        Ok(())
    }

    async fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile> {
        let mut state = self.state();
        state.record("create_profile");

        if state.pending_name_conflicts > 0 {
            state.pending_name_conflicts -= 1;
            return Err(duplicate_name(name));
        }
        if state.profiles.iter().any(|p| p.profile.name == name) {
            return Err(duplicate_name(name));
        }

        let expiration_date = Utc::now() + self.profile_validity;
        self.insert_profile(
            &mut state,
            name,
            profile_type,
            bundle_id,
            certificate_ids,
            device_ids,
            expiration_date,
        )
    }

    async fn list_bundle_id_profiles(&self, bundle_id: &BundleId) -> Result<Vec<Profile>> {
        let mut state = self.state();
        state.record("list_bundle_id_profiles");
        Ok(state
            .profiles
            .iter()
            .filter(|p| p.bundle_id == bundle_id.id)
            .map(|p| p.profile.clone())
            .collect())
    }

    async fn profile_certificate_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        let mut state = self.state();
        state.record("profile_certificate_ids");
        Ok(state.profile(profile_id)?.certificate_ids.clone())
    }

    async fn profile_device_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        let mut state = self.state();
        state.record("profile_device_ids");
        Ok(state.profile(profile_id)?.device_ids.clone())
    }

    async fn profile_bundle_id(&self, profile_id: &str) -> Result<BundleId> {
        let mut state = self.state();
        state.record("profile_bundle_id");
        let bundle_id = state.profile(profile_id)?.bundle_id.clone();
        state
            .bundle_ids
            .iter()
            .find(|stored| stored.bundle_id.id == bundle_id)
            .map(|stored| stored.bundle_id.clone())
            .ok_or_else(|| AutosignError::NonMatchingProfile(PROFILE_REMOVED_CONCURRENTLY.to_string()))
    }

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>> {
        let mut state = self.state();
        state.record("find_bundle_id");
        let candidates = state
            .bundle_ids
            .iter()
            .filter(|stored| stored.bundle_id.identifier.contains(identifier))
            .map(|stored| stored.bundle_id.clone())
            .collect();
        Ok(select_exact_bundle_id(candidates, identifier))
    }

    async fn create_bundle_id(&self, identifier: &str, name: &str) -> Result<BundleId> {
        let mut state = self.state();
        state.record("create_bundle_id");
        if state
            .bundle_ids
            .iter()
            .any(|stored| stored.bundle_id.identifier == identifier)
        {
            return Err(AutosignError::Api {
                status: 409,
                message: format!("An App ID with Identifier '{}' is not available", identifier),
            });
        }
        let bundle_id = BundleId {
            id: state.next_id("bundle"),
            identifier: identifier.to_string(),
            name: name.to_string(),
        };
        state.bundle_ids.push(StoredBundleId {
            bundle_id: bundle_id.clone(),
            capabilities: Vec::new(),
            icloud_containers: Vec::new(),
        });
        Ok(bundle_id)
    }

    async fn list_capabilities(&self, bundle_id: &BundleId) -> Result<Vec<Capability>> {
        let mut state = self.state();
        state.record("list_capabilities");
        Ok(state.bundle_id_mut(&bundle_id.id)?.capabilities.clone())
    }

    async fn enable_capability(&self, bundle_id: &BundleId, capability: &Capability) -> Result<()> {
        let mut state = self.state();
        state.record("enable_capability");
        let stored = state.bundle_id_mut(&bundle_id.id)?;
        upsert_capability(&mut stored.capabilities, capability.clone());
        Ok(())
    }
}
