use std::collections::HashMap;

use crate::error::ResolverError;
use crate::model::{DataItem, Entry, Linkset, LinksetEntry, ResolverDocument};
use crate::path_codec::path_to_id;

const VOC_BASE: &str = "https://gs1.org/voc/";
const DEFAULT_LINK: &str = "https://gs1.org/voc/defaultLink";
const DEFAULT_LINK_MULTI: &str = "https://gs1.org/voc/defaultLinkMulti";

/// Expands a linktype key to its full IRI: `gs1:pip` -> `https://gs1.org/voc/pip`,
/// `http(s)://...` kept verbatim, anything else prepended with the voc base.
pub fn normalize_linktype_key(key: &str) -> String {
    if let Some(suffix) = key.strip_prefix("gs1:") {
        format!("{VOC_BASE}{suffix}")
    } else if key.starts_with("http://") || key.starts_with("https://") {
        key.to_string()
    } else {
        format!("{VOC_BASE}{key}")
    }
}

/// Converts a single submitted `Entry` into a `ResolverDocument` holding one
/// `DataItem`. Does not merge against any existing document — see `merge`.
pub fn author_entry(entry: &Entry) -> Result<ResolverDocument, ResolverError> {
    if entry.anchor.trim().is_empty() {
        return Err(ResolverError::Validation("entry anchor must not be empty".into()));
    }
    if entry.links.is_empty() {
        return Err(ResolverError::Validation(format!(
            "entry {} must have at least one link",
            entry.anchor
        )));
    }

    let id = path_to_id(&entry.anchor)?;

    // Group links by normalized key, preserving first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<LinksetEntry>> = HashMap::new();
    for link in &entry.links {
        let key = normalize_linktype_key(&link.linktype);
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(LinksetEntry {
            href: link.href.clone(),
            title: link.title.clone(),
            media_type: link.media_type.clone(),
            hreflang: link.hreflang.clone(),
            context: link.context.clone(),
        });
    }

    let link_types = reorder_link_types(order, grouped);

    let item = DataItem {
        qualifiers: entry.qualifiers.clone(),
        linkset: Linkset {
            item_description: entry.item_description.clone(),
            link_types,
        },
    };

    Ok(ResolverDocument {
        id,
        default_linktype: entry.default_linktype.clone(),
        data: vec![item],
    })
}

/// Reorders keys so `defaultLink` (truncated to its first entry) comes
/// first, `defaultLinkMulti` (all entries preserved) second, then the
/// remaining keys in first-seen order.
fn reorder_link_types(
    order: Vec<String>,
    mut grouped: HashMap<String, Vec<LinksetEntry>>,
) -> Vec<(String, Vec<LinksetEntry>)> {
    let mut out = Vec::new();

    if let Some(mut entries) = grouped.remove(DEFAULT_LINK) {
        entries.truncate(1);
        out.push((DEFAULT_LINK.to_string(), entries));
    }
    if let Some(entries) = grouped.remove(DEFAULT_LINK_MULTI) {
        out.push((DEFAULT_LINK_MULTI.to_string(), entries));
    }
    for key in order {
        if key == DEFAULT_LINK || key == DEFAULT_LINK_MULTI {
            continue;
        }
        if let Some(entries) = grouped.remove(&key) {
            out.push((key, entries));
        }
    }
    out
}

/// Authors a batch of entries, grouping by document id: within a group,
/// `data` arrays are concatenated in submission order and the first
/// non-null `defaultLinktype` wins. Returns both the successfully authored
/// documents and the per-entry failures (anchor, error); callers report
/// both rather than discarding one on a partial failure.
pub fn author_batch(entries: &[Entry]) -> (Vec<ResolverDocument>, Vec<(String, ResolverError)>) {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, ResolverDocument> = HashMap::new();
    let mut errors = Vec::new();

    for entry in entries {
        match author_entry(entry) {
            Ok(doc) => {
                if let Some(existing) = by_id.get_mut(&doc.id) {
                    existing.data.extend(doc.data);
                    if existing.default_linktype.is_none() {
                        existing.default_linktype = doc.default_linktype;
                    }
                } else {
                    order.push(doc.id.clone());
                    by_id.insert(doc.id.clone(), doc);
                }
            }
            Err(e) => errors.push((entry.anchor.clone(), e)),
        }
    }

    let docs = order.into_iter().filter_map(|id| by_id.remove(&id)).collect();
    (docs, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkV3;

    fn link(linktype: &str, href: &str) -> LinkV3 {
        LinkV3 {
            linktype: linktype.to_string(),
            href: href.to_string(),
            title: "t".to_string(),
            media_type: None,
            hreflang: vec![],
            context: vec![],
        }
    }

    #[test]
    fn normalize_linktype_key_expands_gs1_prefix() {
        assert_eq!(normalize_linktype_key("gs1:pip"), "https://gs1.org/voc/pip");
    }

    #[test]
    fn normalize_linktype_key_keeps_absolute_iri() {
        assert_eq!(
            normalize_linktype_key("https://example.com/voc/custom"),
            "https://example.com/voc/custom"
        );
    }

    #[test]
    fn normalize_linktype_key_prepends_voc_base_for_bare_term() {
        assert_eq!(normalize_linktype_key("pip"), "https://gs1.org/voc/pip");
    }

    #[test]
    fn author_entry_rejects_empty_anchor() {
        let entry = Entry {
            anchor: "".to_string(),
            item_description: None,
            default_linktype: None,
            qualifiers: vec![],
            links: vec![link("gs1:pip", "https://example.com")],
        };
        assert!(author_entry(&entry).is_err());
    }

    #[test]
    fn author_entry_rejects_empty_links() {
        let entry = Entry {
            anchor: "/01/123".to_string(),
            item_description: None,
            default_linktype: None,
            qualifiers: vec![],
            links: vec![],
        };
        assert!(author_entry(&entry).is_err());
    }

    #[test]
    fn author_entry_orders_default_link_first() {
        let entry = Entry {
            anchor: "/01/123".to_string(),
            item_description: None,
            default_linktype: None,
            qualifiers: vec![],
            links: vec![
                link("gs1:certificationInfo", "https://cert.example.com"),
                link("gs1:defaultLinkMulti", "https://multi-a.example.com"),
                link("gs1:defaultLinkMulti", "https://multi-b.example.com"),
                link("gs1:defaultLink", "https://default.example.com"),
            ],
        };
        let doc = author_entry(&entry).unwrap();
        let keys: Vec<&str> = doc.data[0].linkset.link_types.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys[0], "https://gs1.org/voc/defaultLink");
        assert_eq!(keys[1], "https://gs1.org/voc/defaultLinkMulti");
        assert_eq!(doc.data[0].linkset.get("https://gs1.org/voc/defaultLinkMulti").unwrap().len(), 2);
    }

    #[test]
    fn author_batch_groups_by_document_id() {
        let entries = vec![
            Entry {
                anchor: "/01/123".to_string(),
                item_description: None,
                default_linktype: None,
                qualifiers: vec![],
                links: vec![link("gs1:pip", "https://a.example.com")],
            },
            Entry {
                anchor: "/01/123".to_string(),
                item_description: None,
                default_linktype: Some("gs1:pip".to_string()),
                qualifiers: vec![[("10".to_string(), "LOT01".to_string())].into_iter().collect()],
                links: vec![link("gs1:pip", "https://b.example.com")],
            },
        ];
        let (docs, errors) = author_batch(&entries);
        assert!(errors.is_empty());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data.len(), 2);
        assert_eq!(docs[0].default_linktype.as_deref(), Some("gs1:pip"));
    }
}
