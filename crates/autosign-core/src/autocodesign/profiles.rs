//! Provisioning profile reconciliation.
//!
//! Profiles are named deterministically from their type and bundle ID, so a
//! previous run's profile is found again by name. A found profile is kept
//! only if it is active and still satisfies the run; otherwise it is deleted
//! and generated again.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::entitlements::{Entitlements, ICLOUD_CONTAINERS_KEY};
use crate::error::{AutosignError, Result};
use crate::models::{BundleId, Profile, ProfileState, ProfileType};
use crate::portal::ProfileClient;
use crate::signing::parse_profile_entitlements;

use super::{RunContext, bundle_id::check_bundle_id_entitlements, ensure_bundle_id};

/// Everything one profile has to satisfy.
#[derive(Debug, Clone, Copy)]
pub struct ProfileRequest<'a> {
    pub profile_type: ProfileType,
    /// Bundle identifier, possibly a wildcard (`com.acme.*`).
    pub bundle_id: &'a str,
    pub entitlements: &'a Entitlements,
    pub certificate_ids: &'a [String],
    pub device_ids: &'a [String],
    pub min_profile_days_valid: u32,
    pub now: DateTime<Utc>,
}

/// Managed profile name: `[Wildcard ]Bitrise <platform> <distribution> - (<bundle id>)`.
pub fn profile_name(profile_type: ProfileType, bundle_id: &str) -> String {
    let (prefix, bundle_id) = match bundle_id.strip_suffix(".*") {
        Some(stripped) => ("Wildcard ", stripped),
        None => ("", bundle_id),
    };
    format!(
        "{}Bitrise {} {} - ({})",
        prefix,
        profile_type.platform(),
        profile_type.distribution_type(),
        bundle_id
    )
}

/// Wildcard bundle ID covering `bundle_id`: `com.acme.app` becomes `com.acme.*`.
///
/// The wildcard keeps at least two components, so `com.acme` has none.
pub fn wildcard_bundle_id(bundle_id: &str) -> Result<String> {
    match bundle_id.rsplit_once('.') {
        Some((prefix, _)) if prefix.contains('.') && !prefix.starts_with('.') => {
            Ok(format!("{}.*", prefix))
        }
        _ => Err(AutosignError::InvalidBundleId(format!(
            "cannot derive a wildcard from '{}': expected at least three '.'-separated components",
            bundle_id
        ))),
    }
}

/// Whether a profile expires before it has been valid for `min_days` more days.
///
/// A profile expiring exactly at the boundary counts as expiring.
pub fn is_profile_expired(profile: &Profile, min_days: u32, now: DateTime<Utc>) -> bool {
    profile.expiration_date <= now + Duration::days(i64::from(min_days))
}

fn non_matching(reason: String) -> AutosignError {
    AutosignError::NonMatchingProfile(reason)
}

async fn check_profile_entitlements(
    client: &dyn ProfileClient,
    profile: &Profile,
    entitlements: &Entitlements,
) -> Result<()> {
    let project_containers = entitlements.container_identifiers()?;
    if !project_containers.is_empty() {
        let profile_entitlements = parse_profile_entitlements(&profile.content)
            .map_err(|e| non_matching(format!("failed to read profile entitlements: {}", e)))?;
        let profile_containers: HashSet<String> = profile_entitlements
            .container_identifiers()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let missing: Vec<_> = project_containers
            .iter()
            .filter(|container| !profile_containers.contains(*container))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(non_matching(format!(
                "project uses containers that are missing from the provisioning profile ({}): {}",
                ICLOUD_CONTAINERS_KEY,
                missing.join(", ")
            )));
        }
    }

    let bundle_id = client.profile_bundle_id(&profile.id).await?;
    check_bundle_id_entitlements(client, &bundle_id, entitlements).await
}

fn check_subset(present: &HashSet<String>, required: &[String], kind: &str) -> Result<()> {
    match required.iter().find(|id| !present.contains(*id)) {
        Some(id) => Err(non_matching(format!(
            "{} with ID ({}) not included in the profile",
            kind, id
        ))),
        None => Ok(()),
    }
}

/// Compatibility check of an active profile, in order: expiry, entitlements,
/// certificates, devices.
///
/// Every mismatch is a `NonMatchingProfile`; extra certificates or devices on
/// the profile are accepted.
pub async fn check_profile(
    client: &dyn ProfileClient,
    profile: &Profile,
    request: &ProfileRequest<'_>,
) -> Result<()> {
    if is_profile_expired(profile, request.min_profile_days_valid, request.now) {
        return Err(non_matching(format!(
            "profile expired, or will expire in less than {} day(s)",
            request.min_profile_days_valid
        )));
    }

    check_profile_entitlements(client, profile, request.entitlements).await?;

    let certificate_ids = client.profile_certificate_ids(&profile.id).await?;
    check_subset(&certificate_ids, request.certificate_ids, "certificate")?;

    let device_ids = client.profile_device_ids(&profile.id).await?;
    check_subset(&device_ids, request.device_ids, "device")
}

/// Deletes the profile named `name` among the App ID's profiles.
///
/// Reaches expired profiles, which the name search does not return.
async fn delete_expired_profile(
    client: &dyn ProfileClient,
    bundle_id: &BundleId,
    name: &str,
) -> Result<()> {
    let profiles = client.list_bundle_id_profiles(bundle_id).await?;
    let profile = profiles
        .into_iter()
        .find(|profile| profile.name == name)
        .ok_or_else(|| AutosignError::ProfileRetryExhausted {
            name: name.to_string(),
            reason: "no profile with this name is attached to the app ID".to_string(),
        })?;
    tracing::debug!("Deleting expired profile {} ({})", profile.name, profile.id);
    client.delete_profile(&profile.id).await
}

async fn create_profile(
    client: &dyn ProfileClient,
    name: &str,
    bundle_id: &BundleId,
    request: &ProfileRequest<'_>,
) -> Result<Profile> {
    let created = client
        .create_profile(
            name,
            request.profile_type,
            bundle_id,
            request.certificate_ids,
            request.device_ids,
        )
        .await;

    match created {
        Err(e) if e.is_duplicate_profile_name() => {
            tracing::warn!("Profile {} already exists, probably expired; removing it", name);
            delete_expired_profile(client, bundle_id, name).await?;

            client
                .create_profile(
                    name,
                    request.profile_type,
                    bundle_id,
                    request.certificate_ids,
                    request.device_ids,
                )
                .await
                .map_err(|e| {
                    if e.is_duplicate_profile_name() {
                        AutosignError::ProfileRetryExhausted {
                            name: name.to_string(),
                            reason: e.to_string(),
                        }
                    } else {
                        e
                    }
                })
        }
        other => other,
    }
}

/// Finds or generates the managed profile for one bundle ID.
pub async fn ensure_profile(
    client: &dyn ProfileClient,
    ctx: &mut RunContext,
    request: &ProfileRequest<'_>,
) -> Result<Profile> {
    tracing::info!("Checking bundle ID: {}", request.bundle_id);

    let name = profile_name(request.profile_type, request.bundle_id);

    match client.find_profile(&name, request.profile_type).await? {
        None => tracing::warn!("Profile does not exist, generating..."),
        Some(profile) => {
            tracing::info!(
                "Managed profile found: {} ID: {} UUID: {} Expiry: {}",
                profile.name,
                profile.id,
                profile.uuid,
                profile.expiration_date
            );

            match profile.state {
                ProfileState::Active => match check_profile(client, &profile, request).await {
                    Ok(()) => {
                        tracing::info!("Profile is in sync with the project requirements");
                        return Ok(profile);
                    }
                    Err(AutosignError::NonMatchingProfile(reason)) => {
                        tracing::warn!(
                            "The profile is not in sync with the project requirements ({}), regenerating...",
                            reason
                        );
                    }
                    Err(e) => return Err(e),
                },
                ProfileState::Invalid => {
                    tracing::warn!("The profile state is invalid, regenerating...");
                }
                ProfileState::Unknown => {
                    tracing::warn!("The profile is not active, regenerating...");
                }
            }

            client.delete_profile(&profile.id).await?;
        }
    }

    let bundle_id = ensure_bundle_id(client, ctx, request.bundle_id, request.entitlements).await?;

    tracing::info!("Creating profile for bundle ID: {}", bundle_id.name);
    let profile = create_profile(client, &name, &bundle_id, request).await?;
    tracing::info!("Profile created: {}", profile.name);

    Ok(profile)
}
