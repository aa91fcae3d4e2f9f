use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AutosignError, Result};
use crate::models::{BundleId, Capability, Profile, ProfileType};
use crate::portal::{PROFILE_REMOVED_CONCURRENTLY, ProfileClient, select_exact_bundle_id};

use super::client::{AppStoreConnectClient, PAGE_LIMIT};
use super::models::{
    BundleIdAttributes, CapabilityAttributes, Document, ProfileAttributes, Resource, ResourceId,
    capability_settings_json,
};

/// A 404 on a profile relationship means the profile was deleted after it
/// was looked up.
fn removed_if_missing(err: AutosignError) -> AutosignError {
    if err.is_not_found() {
        AutosignError::NonMatchingProfile(PROFILE_REMOVED_CONCURRENTLY.to_string())
    } else {
        err
    }
}

fn linkages(resource_type: &str, ids: &[String]) -> serde_json::Value {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| json!({ "type": resource_type, "id": id }))
            .collect(),
    )
}

impl AppStoreConnectClient {
    async fn relationship_ids(&self, path: &str) -> Result<HashSet<String>> {
        let url = self.url(path, &[("limit", PAGE_LIMIT)])?;
        let resources: Vec<ResourceId> = self.get_all(url).await.map_err(removed_if_missing)?;
        Ok(resources.into_iter().map(|r| r.id).collect())
    }
}

#[async_trait]
impl ProfileClient for AppStoreConnectClient {
    async fn find_profile(&self, name: &str, profile_type: ProfileType) -> Result<Option<Profile>> {
        let url = self.url(
            "profiles",
            &[
                ("filter[name]", name),
                ("filter[profileType]", profile_type.as_str()),
                ("limit", PAGE_LIMIT),
            ],
        )?;
        let resources: Vec<Resource<ProfileAttributes>> = self.get_all(url).await?;

        match resources.into_iter().find(|r| r.attributes.name == name) {
            Some(resource) => Ok(Some(resource.into_profile()?)),
            None => Ok(None),
        }
    }

    async fn delete_profile(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("profiles/{}", id), &[])?;
        match self.delete(url).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!("Profile {} was already deleted", id);
                Ok(())
            }
            other => other,
        }
    }

    async fn create_profile(
        &self,
        name: &str,
        profile_type: ProfileType,
        bundle_id: &BundleId,
        certificate_ids: &[String],
        device_ids: &[String],
    ) -> Result<Profile> {
        let body = json!({
            "data": {
                "type": "profiles",
                "attributes": {
                    "name": name,
                    "profileType": profile_type.as_str(),
                },
                "relationships": {
                    "bundleId": { "data": { "type": "bundleIds", "id": bundle_id.id } },
                    "certificates": { "data": linkages("certificates", certificate_ids) },
                    "devices": { "data": linkages("devices", device_ids) },
                }
            }
        });

        let url = self.url("profiles", &[])?;
        let document: Document<Resource<ProfileAttributes>> = self.post(url, &body).await?;
        document.data.into_profile()
    }

    async fn list_bundle_id_profiles(&self, bundle_id: &BundleId) -> Result<Vec<Profile>> {
        let url = self.url(
            &format!("bundleIds/{}/profiles", bundle_id.id),
            &[("limit", PAGE_LIMIT)],
        )?;
        let resources: Vec<Resource<ProfileAttributes>> = self.get_all(url).await?;
        resources.into_iter().map(Resource::into_profile).collect()
    }

    async fn profile_certificate_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.relationship_ids(&format!("profiles/{}/certificates", profile_id))
            .await
    }

    async fn profile_device_ids(&self, profile_id: &str) -> Result<HashSet<String>> {
        self.relationship_ids(&format!("profiles/{}/devices", profile_id))
            .await
    }

    async fn profile_bundle_id(&self, profile_id: &str) -> Result<BundleId> {
        let url = self.url(&format!("profiles/{}/bundleId", profile_id), &[])?;
        let document: Document<Resource<BundleIdAttributes>> =
            self.get(url).await.map_err(removed_if_missing)?;
        Ok(BundleId::from(document.data))
    }

    async fn find_bundle_id(&self, identifier: &str) -> Result<Option<BundleId>> {
        let url = self.url(
            "bundleIds",
            &[("filter[identifier]", identifier), ("limit", PAGE_LIMIT)],
        )?;
        let resources: Vec<Resource<BundleIdAttributes>> = self.get_all(url).await?;
        let candidates = resources.into_iter().map(BundleId::from).collect();
        Ok(select_exact_bundle_id(candidates, identifier))
    }

    async fn create_bundle_id(&self, identifier: &str, name: &str) -> Result<BundleId> {
        let body = json!({
            "data": {
                "type": "bundleIds",
                "attributes": {
                    "identifier": identifier,
                    "name": name,
                    "platform": "IOS",
                }
            }
        });

        let url = self.url("bundleIds", &[])?;
        let document: Document<Resource<BundleIdAttributes>> = self.post(url, &body).await?;
        Ok(BundleId::from(document.data))
    }

    async fn list_capabilities(&self, bundle_id: &BundleId) -> Result<Vec<Capability>> {
        let url = self.url(
            &format!("bundleIds/{}/bundleIdCapabilities", bundle_id.id),
            &[("limit", PAGE_LIMIT)],
        )?;
        let resources: Vec<Resource<CapabilityAttributes>> = self.get_all(url).await?;
        Ok(resources.into_iter().map(Capability::from).collect())
    }

    async fn enable_capability(&self, bundle_id: &BundleId, capability: &Capability) -> Result<()> {
        let body = json!({
            "data": {
                "type": "bundleIdCapabilities",
                "attributes": {
                    "capabilityType": capability.capability_type,
                    "settings": capability_settings_json(capability),
                },
                "relationships": {
                    "bundleId": { "data": { "type": "bundleIds", "id": bundle_id.id } }
                }
            }
        });

        let url = self.url("bundleIdCapabilities", &[])?;
        self.post_no_content(url, &body).await
    }
}
