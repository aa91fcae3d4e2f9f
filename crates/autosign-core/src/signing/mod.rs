//! Local code-signing helpers.
//!
//! This module provides functionality for:
//! - Downloading and reading PKCS#12 signing certificates
//! - Parsing provisioning profile content
//! - macOS keychain import
//! - Installing reconciled profiles and certificates

pub mod install;
pub mod keychain;
pub mod p12;
pub mod profile_content;

pub use install::*;
pub use keychain::*;
pub use p12::*;
pub use profile_content::*;
