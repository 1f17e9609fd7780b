use serde::{Deserialize, Serialize};

use crate::model::{Entry, LinkV3};

/// A v2 response record, as carried in a v2 export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2Response {
    pub linktype: String,
    pub link: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "ianaLanguage")]
    pub iana_language: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub default_link_type: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2Document {
    pub key_type: String,
    pub key: String,
    #[serde(default)]
    pub qualifier_path: Option<String>,
    #[serde(default)]
    pub item_description: Option<String>,
    pub responses: Vec<V2Response>,
}

/// Converts a v2 document into a v3 `Entry` (SPEC_FULL §4.10). Only
/// `active` responses are projected.
pub fn migrate_document(doc: &V2Document) -> Entry {
    let anchor = format!(
        "/{}/{}{}",
        doc.key_type,
        doc.key,
        doc.qualifier_path.clone().unwrap_or_default()
    );

    let qualifiers = doc
        .qualifier_path
        .as_deref()
        .map(crate::path_codec::parse_qualifier_path)
        .unwrap_or_default();

    let mut default_linktype = None;
    let mut links = Vec::new();

    for response in doc.responses.iter().filter(|r| r.active) {
        if response.default_link_type && default_linktype.is_none() {
            default_linktype = Some(normalize_v2_linktype(&response.linktype));
        }

        let lang = response.iana_language.clone();
        links.push(LinkV3 {
            linktype: normalize_v2_linktype(&response.linktype),
            href: response.link.clone(),
            title: response.title.clone().unwrap_or_default(),
            media_type: None,
            hreflang: lang.into_iter().collect(),
            context: response.context.clone().into_iter().collect(),
        });
    }

    Entry {
        anchor,
        item_description: doc.item_description.clone(),
        default_linktype,
        qualifiers,
        links,
    }
}

fn normalize_v2_linktype(linktype: &str) -> String {
    if linktype.starts_with("gs1:") || linktype.starts_with("http://") || linktype.starts_with("https://") {
        linktype.to_string()
    } else {
        format!("gs1:{linktype}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_anchor_and_qualifier_path() {
        let doc = V2Document {
            key_type: "01".to_string(),
            key: "09506000134376".to_string(),
            qualifier_path: Some("/10/LOT01".to_string()),
            item_description: Some("widget".to_string()),
            responses: vec![V2Response {
                linktype: "pip".to_string(),
                link: "https://example.com/pip".to_string(),
                title: Some("PIP".to_string()),
                iana_language: Some("en".to_string()),
                context: Some("retail".to_string()),
                default_link_type: true,
                active: true,
            }],
        };
        let entry = migrate_document(&doc);
        assert_eq!(entry.anchor, "/01/09506000134376/10/LOT01");
        assert_eq!(entry.default_linktype.as_deref(), Some("gs1:pip"));
        assert_eq!(entry.links[0].hreflang, vec!["en"]);
        assert_eq!(entry.links[0].context, vec!["retail"]);
        assert_eq!(entry.qualifiers[0].get("10").unwrap(), "LOT01");
    }

    #[test]
    fn inactive_responses_are_skipped() {
        let doc = V2Document {
            key_type: "01".to_string(),
            key: "123".to_string(),
            qualifier_path: None,
            item_description: None,
            responses: vec![V2Response {
                linktype: "pip".to_string(),
                link: "https://example.com/old".to_string(),
                title: None,
                iana_language: None,
                context: None,
                default_link_type: false,
                active: false,
            }],
        };
        let entry = migrate_document(&doc);
        assert!(entry.links.is_empty());
    }
}
