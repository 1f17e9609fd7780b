use std::sync::Arc;

use crate::error::ResolverError;
use crate::model::{qualifiers_equal, DataItem, ResolverDocument};
use crate::store::DocumentStore;

const MAX_UPSERT_ATTEMPTS: u32 = 3;

/// Merges `incoming` into `existing` in place, per SPEC_FULL §4.4: items
/// matching by qualifier multiset have their descriptions/hrefs merged;
/// unmatched items are appended.
pub fn merge_document(existing: &mut ResolverDocument, incoming: &ResolverDocument) {
    for new_item in &incoming.data {
        if let Some(matched) = existing
            .data
            .iter_mut()
            .find(|item| qualifiers_equal(&item.qualifiers, &new_item.qualifiers))
        {
            merge_item(matched, new_item);
        } else {
            existing.data.push(new_item.clone());
        }
    }
    if incoming.default_linktype.is_some() {
        existing.default_linktype = incoming.default_linktype.clone();
    }
}

fn merge_item(existing: &mut DataItem, incoming: &DataItem) {
    if incoming.linkset.item_description.is_some() {
        existing.linkset.item_description = incoming.linkset.item_description.clone();
    }
    for (key, entries) in &incoming.linkset.link_types {
        let target = existing.linkset.entry(key);
        for entry in entries {
            if !target.iter().any(|e| e.href == entry.href) {
                target.push(entry.clone());
            }
        }
    }
}

/// Upserts a freshly authored document against the store, merging with any
/// existing document at the same id. Returns `(document, status)` where
/// status is 201 for a brand-new id, 200 otherwise. Retries up to
/// `MAX_UPSERT_ATTEMPTS` times on a version conflict from a concurrent
/// writer (SPEC_FULL §4.4/§5), surfacing `Conflict` once attempts are
/// exhausted.
pub async fn upsert_entries(
    store: &Arc<dyn DocumentStore>,
    authored: ResolverDocument,
) -> Result<(ResolverDocument, u16), ResolverError> {
    for _ in 0..MAX_UPSERT_ATTEMPTS {
        let existing = store.get(&authored.id).await?;

        match existing {
            None => {
                store.upsert(&authored, None).await?;
                return Ok((authored, 201));
            }
            Some(versioned) => {
                let mut merged = versioned.value.clone();
                merge_document(&mut merged, &authored);
                match store.upsert(&merged, Some(versioned.version)).await {
                    Ok(_) => return Ok((merged, 200)),
                    Err(ResolverError::Conflict(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Err(ResolverError::Conflict(format!(
        "too many concurrent writers for {}",
        authored.id
    )))
}
