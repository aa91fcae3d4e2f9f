//! App ID reconciliation.

use crate::entitlements::Entitlements;
use crate::error::{AutosignError, Result};
use crate::models::{BundleId, Capability};
use crate::portal::ProfileClient;

use super::RunContext;

/// Human-readable App ID name derived from a bundle identifier.
///
/// `com.acme.app` becomes `Bitrise com acme app`; wildcard identifiers get a
/// `Wildcard ` prefix.
pub fn app_id_name(identifier: &str) -> String {
    let prefix = if identifier.ends_with(".*") {
        "Wildcard "
    } else {
        ""
    };
    let readable: String = identifier
        .chars()
        .map(|c| match c {
            '.' | '_' | '-' | '*' => ' ',
            other => other,
        })
        .collect();
    format!("{}Bitrise {}", prefix, readable).trim_end().to_string()
}

/// Entitlement keys whose capability is not enabled on the App ID.
fn missing_capability_keys(
    entitlements: &Entitlements,
    enabled: &[Capability],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for key in entitlements.portal_keys() {
        let mut satisfied = false;
        for capability in enabled {
            if entitlements.capability_matches(key, capability)? {
                satisfied = true;
                break;
            }
        }
        if !satisfied {
            missing.push(key.to_string());
        }
    }
    Ok(missing)
}

/// Checks that the App ID has a capability for every portal entitlement.
///
/// A missing capability is reported as `NonMatchingProfile`.
pub async fn check_bundle_id_entitlements(
    client: &dyn ProfileClient,
    bundle_id: &BundleId,
    entitlements: &Entitlements,
) -> Result<()> {
    let enabled = client.list_capabilities(bundle_id).await?;
    let missing = missing_capability_keys(entitlements, &enabled)?;
    match missing.first() {
        Some(key) => Err(AutosignError::NonMatchingProfile(format!(
            "bundle ID {} is missing the capability for entitlement {}",
            bundle_id.identifier, key
        ))),
        None => Ok(()),
    }
}

async fn enable_capabilities<'a>(
    client: &dyn ProfileClient,
    bundle_id: &BundleId,
    entitlements: &Entitlements,
    keys: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for key in keys {
        if let Some(capability) = entitlements.capability_for(key)? {
            tracing::debug!("Enabling {:?} on {}", capability.capability_type, bundle_id.identifier);
            client.enable_capability(bundle_id, &capability).await?;
        }
    }
    Ok(())
}

/// Makes sure an App ID exists for `identifier` with every capability the
/// entitlements need.
///
/// Existing App IDs are only ever extended. iCloud containers requested by a
/// newly created App ID are recorded in `ctx` since they cannot be assigned
/// through the API.
pub async fn ensure_bundle_id(
    client: &dyn ProfileClient,
    ctx: &mut RunContext,
    identifier: &str,
    entitlements: &Entitlements,
) -> Result<BundleId> {
    tracing::info!("Searching for app ID for bundle ID: {}", identifier);

    let existing = match ctx.cached_bundle_id(identifier) {
        Some(bundle_id) => Some(bundle_id.clone()),
        None => client.find_bundle_id(identifier).await?,
    };

    if let Some(bundle_id) = existing {
        tracing::info!("App ID found: {}", bundle_id.name);
        ctx.cache_bundle_id(bundle_id.clone());

        let enabled = client.list_capabilities(&bundle_id).await?;
        let missing = missing_capability_keys(entitlements, &enabled)?;
        if missing.is_empty() {
            tracing::info!("App ID capabilities are in sync with the project capabilities");
        } else {
            tracing::warn!(
                "App ID capabilities are not in sync with the project capabilities ({}), synchronizing...",
                missing.join(", ")
            );
            enable_capabilities(client, &bundle_id, entitlements, missing.iter().map(String::as_str))
                .await?;
        }
        return Ok(bundle_id);
    }

    tracing::warn!("App ID not found, generating...");
    let bundle_id = client
        .create_bundle_id(identifier, &app_id_name(identifier))
        .await?;

    let containers = entitlements.icloud_containers()?;
    if !containers.is_empty() {
        tracing::error!(
            "App ID created but couldn't add iCloud containers: {}",
            containers.join(", ")
        );
        ctx.record_missing_containers(identifier, containers);
    }

    enable_capabilities(client, &bundle_id, entitlements, entitlements.portal_keys()).await?;
    ctx.cache_bundle_id(bundle_id.clone());

    Ok(bundle_id)
}
