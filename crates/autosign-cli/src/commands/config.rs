//! `autosign config` commands for managing CLI configuration.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::config::{CONFIG_ENV, CliConfig, Profile, config_path, load_config};

/// Values shared by `init` and `set`.
#[derive(clap::Args, Debug, Default)]
pub struct ProfileValues {
    /// App Store Connect API key ID
    #[arg(long)]
    api_key_id: Option<String>,

    /// App Store Connect issuer ID
    #[arg(long)]
    api_issuer_id: Option<String>,

    /// Path to the .p8 private key
    #[arg(long)]
    api_key_path: Option<PathBuf>,

    /// Developer Portal team ID
    #[arg(long)]
    team_id: Option<String>,

    /// JSON file listing known test devices
    #[arg(long)]
    test_devices_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create a new config file with a default profile
    Init {
        #[command(flatten)]
        values: ProfileValues,

        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },

    /// Set profile values (creates profile if it doesn't exist)
    Set {
        /// Profile name to update (defaults to "default")
        #[arg(long, default_value = "default")]
        profile: String,

        #[command(flatten)]
        values: ProfileValues,

        /// Set this profile as the default
        #[arg(long)]
        default: bool,
    },

    /// Show current configuration
    Show {
        /// Show actual credential values (by default they are masked)
        #[arg(long)]
        show_secrets: bool,
    },

    /// List all available profiles
    Profiles,

    /// Show config file path
    Path,
}

pub fn handle_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { values, force } => init_config(values, force),
        ConfigCommands::Set {
            profile,
            values,
            default,
        } => set_config(profile, values, default),
        ConfigCommands::Show { show_secrets } => show_config(show_secrets),
        ConfigCommands::Profiles => list_profiles(),
        ConfigCommands::Path => show_path(),
    }
}

/// Applies the given values to a profile; returns whether anything changed.
fn apply_values(profile: &mut Profile, values: ProfileValues) -> bool {
    let path_string = |p: PathBuf| p.to_string_lossy().into_owned();
    let updates = [
        (&mut profile.api_key_id, values.api_key_id),
        (&mut profile.api_issuer_id, values.api_issuer_id),
        (&mut profile.api_key_path, values.api_key_path.map(path_string)),
        (&mut profile.team_id, values.team_id),
        (
            &mut profile.test_devices_path,
            values.test_devices_path.map(path_string),
        ),
    ];

    let mut updated = false;
    for (field, value) in updates {
        if let Some(value) = value {
            *field = Some(value);
            updated = true;
        }
    }
    updated
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if !dir.as_os_str().is_empty() && !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        #[cfg(unix)]
        {
            let permissions = fs::Permissions::from_mode(0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    Ok(())
}

/// Create a new config file.
fn init_config(values: ProfileValues, force: bool) -> Result<()> {
    let config_path = config_path()?;

    if config_path.exists() && !force {
        bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    ensure_parent_dir(&config_path)?;

    let mut profile = Profile::default();
    apply_values(&mut profile, values);

    let mut profiles = HashMap::new();
    profiles.insert("default".to_string(), profile);

    let config = CliConfig {
        default_profile: "default".to_string(),
        profiles,
    };

    write_config(&config_path, &config)?;

    println!("Created config file at {}", config_path.display());
    println!();
    println!("To add an App Store Connect API key:");
    println!(
        "  autosign config set --api-key-id <KEY_ID> --api-issuer-id <ISSUER_ID> --api-key-path <AuthKey.p8>"
    );
    println!();
    println!("To add another team:");
    println!("  autosign config set --profile client --team-id <TEAM_ID>");

    Ok(())
}

/// Update profile values.
fn set_config(profile_name: String, values: ProfileValues, set_default: bool) -> Result<()> {
    let config_path = config_path()?;

    let mut config = load_config()?.unwrap_or_else(|| CliConfig {
        default_profile: "default".to_string(),
        profiles: HashMap::new(),
    });

    let profile = config.profiles.entry(profile_name.clone()).or_default();
    let mut updated = apply_values(profile, values);

    if set_default && config.default_profile != profile_name {
        config.default_profile = profile_name.clone();
        updated = true;
    }

    if !updated && !set_default {
        println!("No changes specified. Use --api-key-id, --api-issuer-id, --api-key-path, --team-id, --test-devices-path or --default.");
        return Ok(());
    }

    ensure_parent_dir(&config_path)?;
    write_config(&config_path, &config)?;

    println!("Updated profile '{}'", profile_name);
    if set_default {
        println!("Set '{}' as default profile", profile_name);
    }

    Ok(())
}

/// Display current configuration.
fn show_config(show_secrets: bool) -> Result<()> {
    let config_path = config_path()?;

    let config = match load_config()? {
        Some(c) => c,
        None => {
            println!("No config file found at {}", config_path.display());
            println!();
            println!("Run 'autosign config init' to create a config file.");
            return Ok(());
        }
    };

    println!("Config file: {}", config_path.display());
    println!("Default profile: {}", config.default_profile);
    println!();

    let mut names: Vec<_> = config.profiles.keys().collect();
    names.sort();

    for name in names {
        let profile = &config.profiles[name];
        let marker = if name == &config.default_profile { " *" } else { "" };
        let not_set = || "(not set)".to_string();
        let secret = |value: &Option<String>| match value {
            Some(v) if show_secrets => v.clone(),
            Some(v) => format!("{} (use --show-secrets to reveal)", mask_token(v)),
            None => not_set(),
        };

        println!("[{}]{}", name, marker);
        println!("  API key ID:   {}", secret(&profile.api_key_id));
        println!("  Issuer ID:    {}", secret(&profile.api_issuer_id));
        println!(
            "  Key path:     {}",
            profile.api_key_path.clone().unwrap_or_else(not_set)
        );
        println!(
            "  Team ID:      {}",
            profile.team_id.clone().unwrap_or_else(not_set)
        );
        println!(
            "  Test devices: {}",
            profile.test_devices_path.clone().unwrap_or_else(not_set)
        );
        println!();
    }

    Ok(())
}

/// List all available profiles.
fn list_profiles() -> Result<()> {
    let config = match load_config()? {
        Some(c) => c,
        None => {
            println!("No config file found. Run 'autosign config init' to create one.");
            return Ok(());
        }
    };

    let mut names: Vec<_> = config.profiles.keys().collect();
    names.sort();

    println!("Available profiles:");
    for name in names {
        if name == &config.default_profile {
            println!("  {} *", name);
        } else {
            println!("  {}", name);
        }
    }
    println!();
    println!("* = default profile");

    Ok(())
}

/// Show the config file path.
fn show_path() -> Result<()> {
    println!("{}", config_path()?.display());

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        println!();
        println!("Note: {} is set to: {}", CONFIG_ENV, env_path);
    }

    Ok(())
}

/// Mask a credential for display (show first 4 and last 4 characters).
/// Requires at least 12 characters to show partial content.
fn mask_token(token: &str) -> String {
    if token.len() < 12 || !token.is_ascii() {
        "*".repeat(token.chars().count())
    } else {
        format!("{}...{}", &token[..4], &token[token.len() - 4..])
    }
}

/// Write config to file with HUML formatting and owner-only permissions.
fn write_config(path: &Path, config: &CliConfig) -> Result<()> {
    let content = serialize_to_huml(config);

    fs::write(path, &content).with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        let permissions = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

fn huml_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Serialize config to HUML format.
///
/// huml-rs only deserializes, so the document is generated by hand.
fn serialize_to_huml(config: &CliConfig) -> String {
    let mut output = String::new();

    output.push_str("%HUML v0.2.0\n");
    output.push_str(&format!(
        "default_profile: {}\n",
        huml_string(&config.default_profile)
    ));
    output.push('\n');
    output.push_str("profiles::\n");

    let mut profile_names: Vec<_> = config.profiles.keys().collect();
    profile_names.sort();

    for name in profile_names {
        let profile = &config.profiles[name];
        let fields = [
            ("api_key_id", &profile.api_key_id),
            ("api_issuer_id", &profile.api_issuer_id),
            ("api_key_path", &profile.api_key_path),
            ("team_id", &profile.team_id),
            ("test_devices_path", &profile.test_devices_path),
        ];

        if fields.iter().all(|(_, value)| value.is_none()) {
            output.push_str(&format!("  {}:: {{}}\n", name));
        } else {
            output.push_str(&format!("  {}::\n", name));
            for (key, value) in fields {
                if let Some(value) = value {
                    output.push_str(&format!("    {}: {}\n", key, huml_string(value)));
                }
            }
        }
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token_short() {
        assert_eq!(mask_token("abc"), "***");
        assert_eq!(mask_token("ABC123XYZ0"), "**********");
        assert_eq!(mask_token("abcdefghijk"), "***********");
    }

    #[test]
    fn test_mask_token_long() {
        assert_eq!(mask_token("abcdefghijkl"), "abcd...ijkl");
        assert_eq!(
            mask_token("12345678-1234-1234-1234-123456789012"),
            "1234...9012"
        );
    }

    #[test]
    fn test_apply_values() {
        let mut profile = Profile::default();
        assert!(!apply_values(&mut profile, ProfileValues::default()));

        let updated = apply_values(
            &mut profile,
            ProfileValues {
                team_id: Some("ABCDE12345".to_string()),
                api_key_path: Some(PathBuf::from("/keys/AuthKey.p8")),
                ..Default::default()
            },
        );
        assert!(updated);
        assert_eq!(profile.team_id.as_deref(), Some("ABCDE12345"));
        assert_eq!(profile.api_key_path.as_deref(), Some("/keys/AuthKey.p8"));
        assert!(profile.api_key_id.is_none());
    }

    #[test]
    fn test_serialize_to_huml() {
        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            Profile {
                team_id: Some("ABCDE12345".to_string()),
                ..Default::default()
            },
        );
        profiles.insert(
            "client".to_string(),
            Profile {
                api_key_id: Some("ABC123XYZ0".to_string()),
                api_issuer_id: Some("12345678-1234-1234-1234-123456789012".to_string()),
                api_key_path: Some("/keys/AuthKey.p8".to_string()),
                team_id: None,
                test_devices_path: Some("/ci/devices.json".to_string()),
            },
        );

        let config = CliConfig {
            default_profile: "default".to_string(),
            profiles,
        };

        let huml = serialize_to_huml(&config);

        assert!(huml.starts_with("%HUML v0.2.0\n"));
        assert!(huml.contains("default_profile: \"default\""));
        assert!(huml.contains("profiles::"));
        assert!(huml.contains("    team_id: \"ABCDE12345\"\n"));
        assert!(huml.contains("    api_key_id: \"ABC123XYZ0\"\n"));
        assert!(huml.contains("    test_devices_path: \"/ci/devices.json\"\n"));
        assert!(huml.find("client::").unwrap() < huml.find("default::").unwrap());
    }

    #[test]
    fn test_serialize_escapes_quotes() {
        assert_eq!(huml_string(r#"a"b"#), r#""a\"b""#);
    }
}
