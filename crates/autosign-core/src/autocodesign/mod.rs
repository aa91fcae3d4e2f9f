//! Code-signing asset reconciliation.
//!
//! The engine runs in this order:
//! 1. Pre-flight entitlement scan (no portal mutation before it passes)
//! 2. Certificate matching, once per run
//! 3. Per distribution type: test device registration, then one profile per
//!    target (App IDs are created or synced on demand)
//! 4. Aggregated iCloud container report

pub mod bundle_id;
pub mod certificates;
pub mod context;
pub mod devices;
pub mod manager;
pub mod profiles;

pub use bundle_id::{app_id_name, ensure_bundle_id};
pub use certificates::{get_valid_certificates, select_certificates_and_distribution_types};
pub use context::RunContext;
pub use devices::ensure_test_devices;
pub use manager::{CodesignManager, CodesignRequest};
pub use profiles::{ProfileRequest, ensure_profile, profile_name, wildcard_bundle_id};
