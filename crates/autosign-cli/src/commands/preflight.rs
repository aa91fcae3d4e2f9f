//! `autosign preflight`: checks entitlements without touching the portal.

use anyhow::Result;
use autosign_core::entitlements::can_generate_profile_with_entitlements;
use console::style;
use std::path::Path;

use crate::layout::load_layout;

use super::Session;

pub fn handle_preflight_command(session: &Session, layout_path: &Path) -> Result<()> {
    // The team is irrelevant here; an empty one keeps the layout loadable.
    let team = session.config.team_id.as_deref().unwrap_or("");
    let layout = load_layout(layout_path, Some(team))?;
    let targets = &layout.app.archivable_target_bundle_id_to_entitlements;

    can_generate_profile_with_entitlements(targets)?;

    println!(
        "{} {} target(s) can be signed with Developer Portal managed profiles",
        style("✓").green().bold(),
        targets.len()
    );
    for (bundle_id, entitlements) in targets {
        let keys: Vec<_> = entitlements.portal_keys().collect();
        if keys.is_empty() {
            println!("  {}", bundle_id);
        } else {
            println!("  {} {}", bundle_id, style(keys.join(", ")).dim());
        }
    }

    Ok(())
}
