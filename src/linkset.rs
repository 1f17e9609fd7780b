use serde_json::{json, Value};

use crate::model::LinksetEntry;

/// Builds the `Link` header value for a resolved identifier (SPEC_FULL §4.6).
/// Non-Latin-1 characters are escaped as `\uXXXX`.
pub fn link_header(fqdn: &str, identifier: &str) -> String {
    let escaped = escape_non_latin1(identifier);
    format!(
        "<https://{fqdn}{escaped}?linkType=linkset>; rel=\"application/linkset\"; type=\"application/linkset+json\"; title=\"Linkset for {escaped}\""
    )
}

fn escape_non_latin1(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if (c as u32) > 0xFF {
            out.push_str(&format!("\\u{:04x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn normalize_href(href: &str, fqdn: &str) -> String {
    if href.contains("://") {
        href.to_string()
    } else if let Some(stripped) = href.strip_prefix('/') {
        format!("https://{fqdn}/{stripped}")
    } else {
        format!("https://{fqdn}/{href}")
    }
}

/// Serializes a matched document's filtered data items into JSON-LD linkset
/// form (SPEC_FULL §4.6). `ai_code` is the anchor's primary application
/// identifier, used to decide whether to add the `gtin` context term.
pub fn format_linkset_body(
    fqdn: &str,
    identifier: &str,
    ai_code: &str,
    gtin_value: Option<&str>,
    link_types: &[(String, Vec<LinksetEntry>)],
) -> Value {
    let mut context = json!({
        "gs1": "https://gs1.org/voc/",
        "schema": "https://schema.org/",
        "linkset": "https://www.iana.org/assignments/link-relations/linkset",
    });
    if ai_code == "01" {
        context["gtin"] = json!({"@id": "gs1:gtin", "@type": "@id"});
    }

    let mut linkset_entries = Vec::new();
    for (key, entries) in link_types {
        let values: Vec<Value> = entries
            .iter()
            .filter(|e| !e.hreflang.iter().any(|h| h.eq_ignore_ascii_case("und")))
            .map(|e| {
                let mut obj = json!({
                    "href": normalize_href(&e.href, fqdn),
                    "title": e.title,
                });
                if let Some(t) = &e.media_type {
                    obj["type"] = json!(t);
                }
                if !e.hreflang.is_empty() {
                    obj["hreflang"] = json!(e.hreflang);
                }
                if !e.context.is_empty() {
                    obj["context"] = json!(e.context);
                }
                obj
            })
            .collect();
        if !values.is_empty() {
            let mut map = serde_json::Map::new();
            map.insert(key.clone(), json!(values));
            linkset_entries.push(Value::Object(map));
        }
    }

    let mut doc = json!({
        "@context": context,
        "@id": format!("https://{fqdn}{identifier}"),
        "@type": "gs1:DigitalLink",
        "gs1:elementStrings": [identifier],
        "linkset": linkset_entries,
    });

    if ai_code == "01" {
        if let Some(v) = gtin_value {
            doc["gtin"] = json!(v);
        }
    }

    doc
}
