//! CLI configuration loading and resolution.
//!
//! Supports profile-based configuration from `~/.autosign/config.huml` with
//! priority order: CLI flags > environment variables > config file > defaults.

use anyhow::{Context, Result, bail};
use autosign_core::config::ApiKeyConfig;
use autosign_core::models::TestDevice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "AUTOSIGN_CONFIG";

/// CLI configuration loaded from config.huml file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    /// Name of the default profile to use.
    pub default_profile: String,
    /// Map of profile name to profile configuration.
    pub profiles: HashMap<String, Profile>,
}

/// A named profile with Developer Portal settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// App Store Connect API key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_issuer_id: Option<String>,
    /// Path to the `.p8` private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_path: Option<String>,
    /// Team used when the layout file does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// JSON file listing known test devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_devices_path: Option<String>,
}

impl Profile {
    fn api_fields_set(&self) -> usize {
        [&self.api_key_id, &self.api_issuer_id, &self.api_key_path]
            .iter()
            .filter(|field| field.is_some())
            .count()
    }
}

/// API key values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyFlags {
    pub key_id: Option<String>,
    pub issuer_id: Option<String>,
    pub key_path: Option<PathBuf>,
}

/// Resolved configuration after applying priority rules.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    /// App Store Connect credentials, if fully configured.
    pub api_key: Option<ApiKeyConfig>,
    pub team_id: Option<String>,
    pub test_devices_path: Option<PathBuf>,
}

/// Returns the default config file path (~/.autosign/config.huml).
pub fn default_config_path() -> Result<PathBuf> {
    config_dir().map(|dir| dir.join("config.huml"))
}

/// Returns the config directory path (~/.autosign).
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|h| h.join(".autosign"))
        .context("Could not determine home directory")
}

/// Config file in use, honoring `AUTOSIGN_CONFIG`.
pub fn config_path() -> Result<PathBuf> {
    match std::env::var(CONFIG_ENV) {
        Ok(p) => Ok(PathBuf::from(p)),
        Err(_) => default_config_path(),
    }
}

/// Load configuration from the config file.
///
/// Returns `Ok(None)` if the config file doesn't exist.
/// Returns an error if the file exists but is invalid.
pub fn load_config() -> Result<Option<CliConfig>> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(None);
    }

    let content =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let config: CliConfig = huml_rs::serde::from_str(&content)
        .with_context(|| format!("Invalid HUML in {}", path.display()))?;

    validate_config(&config)?;
    check_file_permissions(&path);

    Ok(Some(config))
}

/// Validate that the config has at least one profile, the default profile
/// exists and API keys are complete.
fn validate_config(config: &CliConfig) -> Result<()> {
    if config.profiles.is_empty() {
        bail!("Config file must contain at least one profile");
    }

    if !config.profiles.contains_key(&config.default_profile) {
        bail!(
            "Default profile '{}' not found in profiles",
            config.default_profile
        );
    }

    for (name, profile) in &config.profiles {
        let set = profile.api_fields_set();
        if set != 0 && set != 3 {
            bail!(
                "Profile '{}' has a partial API key. Set all of: api_key_id, api_issuer_id, api_key_path",
                name
            );
        }
    }

    Ok(())
}

/// Warn if config file has overly permissive permissions (on Unix).
#[cfg(unix)]
fn check_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            eprintln!(
                "Warning: {} has overly permissive permissions ({:o}). Consider running: chmod 600 {}",
                path.display(),
                mode & 0o777,
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn check_file_permissions(_path: &Path) {}

/// Resolve configuration by applying priority rules.
///
/// Flags and environment variables arrive merged in `flags` (clap gives a
/// flag precedence over its variable); each of them overrides the profile.
pub fn resolve_config(
    profile_flag: Option<&str>,
    flags: &ApiKeyFlags,
    file_config: Option<CliConfig>,
) -> Result<ResolvedConfig> {
    let mut profile = Profile::default();

    if let Some(config) = file_config {
        let profile_name = profile_flag.unwrap_or(&config.default_profile);
        if let Some(found) = config.profiles.get(profile_name) {
            profile = found.clone();
        } else if profile_flag.is_some() {
            bail!(
                "Profile '{}' not found. Run 'autosign config profiles' to see available profiles.",
                profile_name
            );
        }
    } else if let Some(requested_profile) = profile_flag {
        if requested_profile != "default" {
            bail!(
                "Profile '{}' not found. No config file exists. Run 'autosign config init' to create one.",
                requested_profile
            );
        }
    }

    let key_id = flags.key_id.clone().or(profile.api_key_id);
    let issuer_id = flags.issuer_id.clone().or(profile.api_issuer_id);
    let key_path = flags
        .key_path
        .clone()
        .or_else(|| profile.api_key_path.map(PathBuf::from));

    let api_key = match (key_id, issuer_id, key_path) {
        (Some(key_id), Some(issuer_id), Some(key_path)) => {
            Some(ApiKeyConfig::new(key_id, issuer_id, key_path))
        }
        (None, None, None) => None,
        (key_id, issuer_id, key_path) => {
            let mut missing = Vec::new();
            if key_id.is_none() {
                missing.push("--api-key-id (AUTOSIGN_API_KEY_ID)");
            }
            if issuer_id.is_none() {
                missing.push("--api-issuer-id (AUTOSIGN_API_ISSUER_ID)");
            }
            if key_path.is_none() {
                missing.push("--api-key-path (AUTOSIGN_API_KEY_PATH)");
            }
            bail!("Partial App Store Connect API key, missing: {}", missing.join(", "));
        }
    };

    Ok(ResolvedConfig {
        api_key,
        team_id: profile.team_id,
        test_devices_path: profile.test_devices_path.map(PathBuf::from),
    })
}

/// Reads the known test devices roster (a JSON array).
pub fn load_test_devices(path: &Path) -> Result<Vec<TestDevice>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid test device list in {}", path.display()))
}
