use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Single-key AI/value qualifier map, e.g. `{"10": "LOT01"}`.
pub type Qualifier = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub anchor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_linktype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Qualifier>,
    pub links: Vec<LinkV3>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkV3 {
    pub linktype: String,
    pub href: String,
    pub title: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hreflang: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

/// Flat storage key derived from an anchor: `/01/123/21/X` -> `01_123_21_X`.
pub type DocumentId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverDocument {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_linktype: Option<String>,
    pub data: Vec<DataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Qualifier>,
    pub linkset: Linkset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linkset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_description: Option<String>,
    /// Keyed by fully expanded link-type IRI, e.g. `https://gs1.org/voc/pip`.
    /// Order of keys matters (defaultLink, defaultLinkMulti, then first-seen
    /// order) so this is a `Vec` of pairs rather than a `BTreeMap`.
    pub link_types: Vec<(String, Vec<LinksetEntry>)>,
}

impl Linkset {
    pub fn get(&self, key: &str) -> Option<&Vec<LinksetEntry>> {
        self.link_types
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Vec<LinksetEntry>> {
        self.link_types
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn entry(&mut self, key: &str) -> &mut Vec<LinksetEntry> {
        if self.get(key).is_none() {
            self.link_types.push((key.to_string(), Vec::new()));
        }
        self.get_mut(key).unwrap()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinksetEntry {
    pub href: String,
    pub title: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hreflang: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

/// Checks whether two qualifier lists are equal as multisets of single-key
/// mappings (order-insensitive, multiplicities matter). Mirrors the
/// qualifier-set-equality rule used by the merge engine (distinct from the
/// request-time pattern match in `negotiation`/`resolver`).
pub fn qualifiers_equal(a: &[Qualifier], b: &[Qualifier]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut remaining: Vec<&Qualifier> = b.iter().collect();
    for qa in a {
        let Some(pos) = remaining.iter().position(|qb| *qb == qa) else {
            return false;
        };
        remaining.remove(pos);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> Qualifier {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn qualifiers_equal_ignores_order() {
        let a = vec![q(&[("10", "LOT01")]), q(&[("21", "SN1")])];
        let b = vec![q(&[("21", "SN1")]), q(&[("10", "LOT01")])];
        assert!(qualifiers_equal(&a, &b));
    }

    #[test]
    fn qualifiers_equal_respects_multiplicity() {
        let a = vec![q(&[("10", "LOT01")]), q(&[("10", "LOT01")])];
        let b = vec![q(&[("10", "LOT01")])];
        assert!(!qualifiers_equal(&a, &b));
    }

    #[test]
    fn linkset_entry_preserves_insertion_order() {
        let mut ls = Linkset {
            item_description: None,
            link_types: Vec::new(),
        };
        ls.entry("https://gs1.org/voc/defaultLinkMulti").push(LinksetEntry {
            href: "https://a".into(),
            title: "a".into(),
            media_type: None,
            hreflang: vec![],
            context: vec![],
        });
        ls.entry("https://gs1.org/voc/defaultLink").push(LinksetEntry {
            href: "https://b".into(),
            title: "b".into(),
            media_type: None,
            hreflang: vec![],
            context: vec![],
        });
        assert_eq!(ls.link_types[0].0, "https://gs1.org/voc/defaultLinkMulti");
        assert_eq!(ls.link_types[1].0, "https://gs1.org/voc/defaultLink");
    }
}
