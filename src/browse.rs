use crate::catalog::RemoteModSummary;
use std::{cmp::Ordering, sync::Arc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl FilterCriteria {
    pub fn matches(&self, summary: &RemoteModSummary) -> bool {
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|tag| summary.has_tag(tag)) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !summary.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Catalog,
    Name,
    Downloads,
    Likes,
    Updated,
}

impl SortKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "catalog" => Some(SortKey::Catalog),
            "name" => Some(SortKey::Name),
            "downloads" => Some(SortKey::Downloads),
            "likes" => Some(SortKey::Likes),
            "updated" | "last-updated" => Some(SortKey::Updated),
            _ => None,
        }
    }

    fn compare(self, a: &RemoteModSummary, b: &RemoteModSummary) -> Ordering {
        match self {
            SortKey::Catalog => Ordering::Equal,
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::Downloads => a.downloads.cmp(&b.downloads),
            SortKey::Likes => a.likes.cmp(&b.likes),
            SortKey::Updated => a.updated_at.cmp(&b.updated_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

impl SortSpec {
    pub fn new(key: SortKey, descending: bool) -> Self {
        Self { key, descending }
    }

    pub fn reversed(self) -> Self {
        Self {
            key: self.key,
            descending: !self.descending,
        }
    }
}

pub fn filter_mods(
    mods: &[Arc<RemoteModSummary>],
    criteria: &FilterCriteria,
) -> Vec<Arc<RemoteModSummary>> {
    mods.iter()
        .filter(|summary| criteria.matches(summary))
        .cloned()
        .collect()
}

/// Stable in both directions: equal keys keep their input order.
pub fn sort_mods(mods: &mut [Arc<RemoteModSummary>], spec: SortSpec) {
    mods.sort_by(|a, b| {
        let ordering = spec.key.compare(a, b);
        if spec.descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

/// Filters then sorts a snapshot into a new presentation order. The input
/// slice is never reordered.
pub fn apply(
    mods: &[Arc<RemoteModSummary>],
    criteria: &FilterCriteria,
    spec: SortSpec,
) -> Vec<Arc<RemoteModSummary>> {
    let mut out = filter_mods(mods, criteria);
    sort_mods(&mut out, spec);
    tracing::debug!(
        "Filtered {} mods to {} ({criteria:?}, {spec:?})",
        mods.len(),
        out.len()
    );
    out
}
