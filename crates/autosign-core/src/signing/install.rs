//! Installs reconciled signing assets on this machine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{AutosignError, Result};
use crate::models::{CodesignAssets, DistributionType, Profile};

use super::Keychain;

/// Default provisioning profile directory (`~/Library/MobileDevice/Provisioning Profiles`).
pub fn profiles_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join("Library/MobileDevice/Provisioning Profiles"))
        .ok_or_else(|| AutosignError::Signing("No home directory found".to_string()))
}

/// Writes a profile as `<UUID>.mobileprovision`, readable by the owner only.
pub async fn write_profile(dir: &Path, profile: &Profile) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(format!("{}.mobileprovision", profile.uuid));
    tokio::fs::write(&path, &profile.content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tracing::debug!("Installed provisioning profile: {}", path.display());
    Ok(path)
}

/// What [`install_codesign_assets`] put in place.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub certificates: Vec<String>,
    pub profiles: Vec<PathBuf>,
}

/// Imports each chosen certificate once and writes every profile.
///
/// Certificates without key material are skipped with a warning.
pub async fn install_codesign_assets(
    assets: &HashMap<DistributionType, CodesignAssets>,
    keychain: Option<&Keychain>,
    profiles_dir: &Path,
) -> Result<InstallReport> {
    let mut report = InstallReport::default();
    let ordered: BTreeMap<_, _> = assets.iter().collect();
    let mut imported = HashSet::new();

    for (distribution, assets) in ordered {
        let certificate = &assets.certificate.certificate;
        if imported.insert(certificate.serial_number.clone()) {
            match (keychain, &certificate.identity) {
                (Some(keychain), Some(identity)) => {
                    keychain.import_identity(identity).await?;
                    tracing::info!("Installed {} certificate: {}", distribution, certificate.common_name);
                    report.certificates.push(certificate.common_name.clone());
                }
                (Some(_), None) => {
                    tracing::warn!(
                        "No key material for {}, skipping keychain import",
                        certificate.common_name
                    );
                }
                (None, _) => {}
            }
        }

        let profiles = assets
            .archivable_target_profiles_by_bundle_id
            .values()
            .chain(assets.ui_test_target_profiles_by_bundle_id.values());
        for profile in profiles {
            report.profiles.push(write_profile(profiles_dir, profile).await?);
        }
    }

    Ok(report)
}
