//! Project layout files.
//!
//! A layout describes the signing-relevant shape of a project: its platform,
//! the archivable targets with their entitlements and the UI-test targets.

use anyhow::{Context, Result, bail};
use autosign_core::AutosignError;
use autosign_core::entitlements::Entitlements;
use autosign_core::models::{AppLayout, Platform};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct LayoutFile {
    #[serde(default)]
    team_id: Option<String>,
    platform: String,
    main_bundle_id: String,
    targets: Vec<TargetEntry>,
    #[serde(default)]
    ui_test_bundle_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TargetEntry {
    bundle_id: String,
    /// `.entitlements` plist, relative to the layout file.
    #[serde(default)]
    entitlements: Option<PathBuf>,
}

/// A loaded layout together with the bundle ID whose settings are exported.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub app: AppLayout,
    pub main_bundle_id: String,
}

/// Reads a layout file and every entitlements file it references.
///
/// The team ID comes from the layout, then `fallback_team_id`.
pub fn load_layout(path: &Path, fallback_team_id: Option<&str>) -> Result<ProjectLayout> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file: LayoutFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid layout file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let platform: Platform = file
        .platform
        .parse()
        .map_err(|_| AutosignError::UnsupportedPlatform(file.platform.clone()))?;

    let team_id = file
        .team_id
        .filter(|t| !t.is_empty())
        .or_else(|| fallback_team_id.map(str::to_string))
        .context("No team ID: set \"team_id\" in the layout file or in the config profile")?;

    let mut targets = BTreeMap::new();
    for target in file.targets {
        let entitlements = match target.entitlements {
            Some(relative) => read_entitlements(&base_dir.join(relative))?,
            None => Entitlements::new(),
        };
        if targets.insert(target.bundle_id.clone(), entitlements).is_some() {
            bail!("Target {} is listed more than once", target.bundle_id);
        }
    }

    if !targets.contains_key(&file.main_bundle_id) {
        bail!(
            "Main bundle ID {} is not one of the layout's targets",
            file.main_bundle_id
        );
    }

    Ok(ProjectLayout {
        app: AppLayout {
            team_id,
            platform,
            archivable_target_bundle_id_to_entitlements: targets,
            ui_test_target_bundle_ids: file.ui_test_bundle_ids,
        },
        main_bundle_id: file.main_bundle_id,
    })
}

fn read_entitlements(path: &Path) -> Result<Entitlements> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Entitlements::from_plist_bytes(&data)
        .with_context(|| format!("Invalid entitlements file {}", path.display()))
}
