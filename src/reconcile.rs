use crate::{
    catalog::{ModCollection, RemoteModSummary},
    installed::InstalledMod,
};
use std::sync::Arc;

/// First catalog entry whose name contains `installed_name`, ignoring case.
/// Catalog order decides between several candidates.
pub fn find_remote_match<'a>(
    installed_name: &str,
    catalog: &'a [Arc<RemoteModSummary>],
) -> Option<&'a Arc<RemoteModSummary>> {
    let needle = installed_name.to_lowercase();
    catalog
        .iter()
        .find(|summary| summary.name.to_lowercase().contains(&needle))
}

/// Links every installed mod to its catalog entry. Mods with no match keep
/// `linked_remote == None`; that includes local-only and delisted mods.
pub fn reconcile(installed: &mut [InstalledMod], collection: &ModCollection) -> usize {
    let mut linked = 0usize;
    for installed_mod in installed.iter_mut() {
        installed_mod.linked_remote = find_remote_match(&installed_mod.name, &collection.mods).cloned();
        match &installed_mod.linked_remote {
            Some(remote) => {
                linked += 1;
                tracing::debug!(
                    "Matched installed {} to mod.io {} ({})",
                    installed_mod.name,
                    remote.name,
                    remote.id
                );
            }
            None => tracing::debug!("No mod.io entry for installed {}", installed_mod.name),
        }
    }
    linked
}
