//! Autosign Core Library
//!
//! Code-signing asset reconciliation for iOS and tvOS projects: keeps App IDs,
//! provisioning profiles, test devices and certificates on the Apple Developer
//! Portal in line with what a project needs, and installs the results locally.

pub mod autocodesign;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod models;
pub mod outputs;
pub mod portal;
pub mod signing;

pub use autocodesign::{CodesignManager, CodesignRequest};
pub use error::{AutosignError, Result};
pub use portal::DevPortalClient;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
