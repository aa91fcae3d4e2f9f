//! macOS keychain management for installing signing certificates.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::error::{AutosignError, Result};
use crate::models::Pkcs12Identity;

/// A keychain that signing identities are imported into.
#[derive(Debug)]
pub struct Keychain {
    path: PathBuf,
    password: SecretString,
}

impl Keychain {
    /// Opens the keychain at `path`, creating it first if it does not exist.
    ///
    /// Newly created keychains are added to the user search list so that
    /// `codesign` can find the imported identities.
    pub async fn open_or_create(path: impl Into<PathBuf>, password: SecretString) -> Result<Self> {
        let keychain = Self {
            path: path.into(),
            password,
        };

        if !keychain.path.exists() {
            keychain.create().await?;
            keychain.add_to_search_list().await?;
        }
        keychain.unlock().await?;

        Ok(keychain)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create(&self) -> Result<()> {
        run_security(
            Command::new("security")
                .args(["create-keychain", "-p", self.password.expose_secret()])
                .arg(&self.path),
            "create keychain",
        )
        .await?;

        // No auto-lock, 1 hour timeout
        let _ = Command::new("security")
            .args(["set-keychain-settings", "-t", "3600", "-u"])
            .arg(&self.path)
            .output()
            .await;

        tracing::debug!("Created keychain: {}", self.path.display());
        Ok(())
    }

    pub async fn unlock(&self) -> Result<()> {
        run_security(
            Command::new("security")
                .args(["unlock-keychain", "-p", self.password.expose_secret()])
                .arg(&self.path),
            "unlock keychain",
        )
        .await?;
        tracing::debug!("Unlocked keychain: {}", self.path.display());
        Ok(())
    }

    /// Imports a p12 identity with codesign access.
    pub async fn import_identity(&self, identity: &Pkcs12Identity) -> Result<()> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| AutosignError::Keychain(format!("Failed to create temp directory: {}", e)))?;
        let p12_path = temp_dir.path().join("cert.p12");
        tokio::fs::write(&p12_path, &identity.data)
            .await
            .map_err(|e| AutosignError::Keychain(format!("Failed to write temp p12 file: {}", e)))?;

        run_security(
            Command::new("security")
                .arg("import")
                .arg(&p12_path)
                .arg("-k")
                .arg(&self.path)
                .args([
                    "-P",
                    identity.passphrase.expose_secret(),
                    "-T",
                    "/usr/bin/codesign",
                    "-T",
                    "/usr/bin/security",
                ]),
            "import certificate",
        )
        .await?;

        // Allows codesign to use the key without a UI prompt
        let output = Command::new("security")
            .args([
                "set-key-partition-list",
                "-S",
                "apple-tool:,apple:,codesign:",
                "-s",
                "-k",
                self.password.expose_secret(),
            ])
            .arg(&self.path)
            .output()
            .await
            .map_err(|e| AutosignError::Keychain(format!("Failed to set key partition list: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("Failed to set key partition list (may still work): {}", stderr);
        }

        tracing::debug!("Imported certificate into keychain: {}", self.path.display());
        Ok(())
    }

    async fn add_to_search_list(&self) -> Result<()> {
        let output = Command::new("security")
            .args(["list-keychains", "-d", "user"])
            .output()
            .await
            .map_err(|e| AutosignError::Keychain(format!("Failed to list keychains: {}", e)))?;

        let current = parse_keychain_list(&String::from_utf8_lossy(&output.stdout));
        let path = self.path.to_string_lossy().to_string();
        if current.contains(&path) {
            return Ok(());
        }

        let mut list = vec![path];
        list.extend(current);
        run_security(
            Command::new("security")
                .args(["list-keychains", "-d", "user", "-s"])
                .args(&list),
            "set keychain list",
        )
        .await?;

        tracing::debug!("Added keychain to search list: {}", self.path.display());
        Ok(())
    }
}

async fn run_security(command: &mut Command, action: &str) -> Result<()> {
    let output = command
        .output()
        .await
        .map_err(|e| AutosignError::Keychain(format!("Failed to {}: {}", action, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AutosignError::Keychain(format!(
            "Failed to {}: {}",
            action,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Parses `security list-keychains` output.
fn parse_keychain_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keychain_list() {
        let output = "    \"/Users/ci/Library/Keychains/login.keychain-db\"\n    \"/Library/Keychains/System.keychain\"\n\n";
        assert_eq!(
            parse_keychain_list(output),
            vec![
                "/Users/ci/Library/Keychains/login.keychain-db".to_string(),
                "/Library/Keychains/System.keychain".to_string(),
            ]
        );
    }
}
