//! Build settings exported after a successful run.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AutosignError, Result};
use crate::models::{CodesignAssets, DistributionType};

/// Signing settings a build step needs for the main target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodesignOutputs {
    pub export_method: DistributionType,
    pub developer_team: String,
    pub development_codesign_identity: Option<String>,
    pub development_profile: Option<String>,
    pub production_codesign_identity: Option<String>,
    pub production_profile: Option<String>,
}

fn main_target_settings(
    assets: &HashMap<DistributionType, CodesignAssets>,
    distribution: DistributionType,
    main_bundle_id: &str,
) -> Result<Option<(String, String)>> {
    let Some(settings) = assets.get(&distribution) else {
        return Ok(None);
    };
    let profile = settings
        .archivable_target_profiles_by_bundle_id
        .get(main_bundle_id)
        .ok_or_else(|| {
            AutosignError::Signing(format!(
                "no {} provisioning profile ensured for the main target ({})",
                distribution, main_bundle_id
            ))
        })?;
    Ok(Some((
        settings.certificate.certificate.common_name.clone(),
        profile.uuid.clone(),
    )))
}

impl CodesignOutputs {
    pub fn from_assets(
        distribution: DistributionType,
        team_id: &str,
        main_bundle_id: &str,
        assets: &HashMap<DistributionType, CodesignAssets>,
    ) -> Result<Self> {
        let development =
            main_target_settings(assets, DistributionType::Development, main_bundle_id)?;

        let production = if distribution == DistributionType::Development {
            None
        } else {
            let settings = main_target_settings(assets, distribution, main_bundle_id)?;
            if settings.is_none() {
                return Err(AutosignError::Signing(format!(
                    "no codesign settings ensured for the selected distribution type: {}",
                    distribution
                )));
            }
            settings
        };

        let (development_codesign_identity, development_profile) = development.unzip();
        let (production_codesign_identity, production_profile) = production.unzip();

        Ok(Self {
            export_method: distribution,
            developer_team: team_id.to_string(),
            development_codesign_identity,
            development_profile,
            production_codesign_identity,
            production_profile,
        })
    }

    /// Output variables in a stable order; unset values are omitted.
    pub fn to_env_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("EXPORT_METHOD", self.export_method.to_string()),
            ("DEVELOPER_TEAM", self.developer_team.clone()),
        ];
        let optional = [
            ("DEVELOPMENT_CODESIGN_IDENTITY", &self.development_codesign_identity),
            ("DEVELOPMENT_PROFILE", &self.development_profile),
            ("PRODUCTION_CODESIGN_IDENTITY", &self.production_codesign_identity),
            ("PRODUCTION_PROFILE", &self.production_profile),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        pairs
    }

    /// `KEY=VALUE` lines, values quoted when they contain whitespace.
    pub fn render_env(&self) -> String {
        self.to_env_pairs()
            .into_iter()
            .map(|(key, value)| {
                if value.chars().any(char::is_whitespace) {
                    format!("{}=\"{}\"\n", key, value.replace('"', "\\\""))
                } else {
                    format!("{}={}\n", key, value)
                }
            })
            .collect()
    }

    pub async fn write_env_file(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.render_env()).await?;
        tracing::debug!("Wrote outputs to {}", path.display());
        Ok(())
    }
}
