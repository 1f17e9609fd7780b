use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ResolverOptions;
use crate::error::ResolverError;
use crate::linkset::{format_linkset_body, link_header};
use crate::model::{LinksetEntry, Qualifier};
use crate::negotiation::{negotiate_traced, NegotiationRequest};
use crate::path_codec::{parse_qualifier_path, path_to_id};
use crate::store::DocumentStore;
use crate::toolkit::ToolkitAdapter;

const SERIALIZED_AI_CODES: &[&str] = &["8003", "8004", "00"];
const QUERY_EXCLUDED: &[&str] = &["linktype", "compress", "context"];

#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub linktype: Option<String>,
    pub context: Option<String>,
    pub accept_languages: Vec<String>,
    pub media_types: Vec<String>,
    pub linkset_requested: bool,
    /// Incoming query parameters, used to reconstruct the 307 `Location`
    /// (SPEC_FULL §4.5.3).
    pub query_params: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Redirect { location: String, link_header: String, negotiation_rule: &'static str },
    MultipleChoices { body: Value, link_header: String, negotiation_rule: &'static str },
    Linkset { body: Value, link_header: String },
}

/// Entry point for §4.5. `identifier` is the primary anchor (`/ai/value`);
/// `qualifier_path` is everything after it, unparsed.
pub async fn resolve(
    toolkit: &dyn ToolkitAdapter,
    store: &Arc<dyn DocumentStore>,
    identifier: &str,
    qualifier_path: Option<&str>,
    ctx: &ResolveContext,
    options: &ResolverOptions,
    fqdn: &str,
) -> Result<ResolveOutcome, ResolverError> {
    let identifier = normalize_gtin_13_to_14(identifier);

    let full_path = format!("{identifier}{}", qualifier_path.unwrap_or(""));
    let syntax_ok = toolkit
        .test_syntax(&full_path)
        .await
        .map_err(|e| ResolverError::Internal(anyhow::anyhow!("toolkit test_syntax failed: {e}")))?;
    if !syntax_ok {
        return Err(ResolverError::Validation(format!("invalid GS1 Digital Link syntax: {full_path}")));
    }

    let (ai_code, ai_value) = split_ai_value(&identifier)
        .ok_or_else(|| ResolverError::Validation(format!("malformed identifier: {identifier}")))?;

    let id = path_to_id(&identifier)?;
    let mut doc = store.get(&id).await?;

    let mut template_vars: HashMap<String, String> = HashMap::new();
    let mut effective_id = identifier.clone();

    if doc.is_none() && SERIALIZED_AI_CODES.contains(&ai_code.as_str()) {
        if let Some((found, bindings, shortened_identifier)) =
            serialized_partial_match(store, &ai_code, &ai_value).await?
        {
            doc = Some(found);
            template_vars.extend(bindings);
            effective_id = shortened_identifier;
        }
    }

    let doc = doc.ok_or_else(|| ResolverError::NotFound(format!("no document for {identifier}")))?;
    let document = doc.value;

    // Qualifier filtering (§4.5 step 6 / §4.5.1).
    let mut filtered: Vec<crate::model::DataItem> = Vec::new();
    if let Some(qp) = qualifier_path.filter(|s| !s.is_empty()) {
        let request_qualifiers = parse_qualifier_path(qp);
        for item in &document.data {
            if let Some(bindings) = match_qualifiers(&item.qualifiers, &request_qualifiers) {
                template_vars.extend(bindings);
                filtered.push(item.clone());
            }
        }
        if filtered.is_empty() {
            return Err(ResolverError::NotFound(format!("no matching qualifiers for {full_path}")));
        }
    } else {
        filtered = document.data.iter().filter(|item| item.qualifiers.is_empty()).cloned().collect();
        if filtered.is_empty() {
            return Err(ResolverError::NotFound(format!("no default qualifier entry for {identifier}")));
        }
    }

    // Template substitution (§4.5 step 7). Non-fatal on failure.
    if !template_vars.is_empty() {
        if let Ok(substituted) = substitute_templates(&filtered, &template_vars) {
            filtered = substituted;
        } else {
            tracing::warn!(identifier = %effective_id, "template substitution failed, serving unsubstituted items");
        }
    }

    let link_types: Vec<(String, Vec<LinksetEntry>)> = merge_filtered_link_types(&filtered);
    let header = link_header(fqdn, &identifier);

    // Linkset branch (§4.5 step 9). Wildcards `*`/`all` collapse here too.
    let wants_linkset = ctx.linkset_requested
        || ctx
            .linktype
            .as_deref()
            .map(|lt| lt == "*" || lt.eq_ignore_ascii_case("all") || lt.eq_ignore_ascii_case("linkset"))
            .unwrap_or(false);
    if wants_linkset {
        let gtin_value = if ai_code == "01" { Some(ai_value.as_str()) } else { None };
        let body = format_linkset_body(fqdn, &identifier, &ai_code, gtin_value, &link_types);
        return Ok(ResolveOutcome::Linkset { body, link_header: header });
    }

    // Linktype selection (§4.5 step 10 / §4.5.2).
    let requested_lt = ctx.linktype.clone().unwrap_or_else(|| {
        document
            .default_linktype
            .clone()
            .unwrap_or_else(|| options.default_linktype.clone())
    });
    let normalized_lt = normalize_linktype(&requested_lt);

    let mut candidates: Vec<&LinksetEntry> = link_types
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(&normalized_lt))
        .flat_map(|(_, v)| v.iter())
        .collect();

    if candidates.is_empty() && options.linktype_fallback {
        candidates = link_types
            .iter()
            .filter(|(k, _)| {
                k.eq_ignore_ascii_case(&requested_lt)
                    || k.to_lowercase().contains(&requested_lt.to_lowercase())
                    || k.to_lowercase().ends_with(&format!("/{}", requested_lt.to_lowercase()))
            })
            .flat_map(|(_, v)| v.iter())
            .collect();
    }

    if candidates.is_empty() {
        return Err(ResolverError::NotFound(format!("no entries for linktype {requested_lt}")));
    }

    // Content negotiation (§4.7).
    let owned_candidates: Vec<LinksetEntry> = candidates.into_iter().cloned().collect();
    let negotiation_req = NegotiationRequest {
        accept_languages: ctx.accept_languages.clone(),
        context: ctx.context.clone(),
        media_types: ctx.media_types.clone(),
        has_explicit_linktype: ctx.linktype.is_some(),
    };
    let (negotiated, negotiation_rule) = negotiate_traced(&owned_candidates, &negotiation_req);
    if negotiated.is_empty() {
        return Err(ResolverError::NotFound(format!("no entries for linktype {requested_lt}")));
    }

    // Response shaping (§4.5 step 12).
    if negotiated.len() == 1 {
        let target = substitute_href(&negotiated[0].href, &template_vars);
        let location = append_preserved_query(&target, &ctx.query_params);
        Ok(ResolveOutcome::Redirect { location, link_header: header, negotiation_rule })
    } else {
        let body = serde_json::json!({
            "linkset": negotiated.iter().map(|e| {
                serde_json::json!({
                    "href": substitute_href(&e.href, &template_vars),
                    "type": e.media_type,
                    "hreflang": e.hreflang,
                    "title": e.title,
                })
            }).collect::<Vec<_>>(),
        });
        Ok(ResolveOutcome::MultipleChoices { body, link_header: header, negotiation_rule })
    }
}

pub async fn resolve_compressed(
    toolkit: &dyn ToolkitAdapter,
    identifier_and_qualifiers: &str,
) -> Result<String, ResolverError> {
    toolkit
        .compress(identifier_and_qualifiers)
        .await
        .map_err(ResolverError::Validation)
}

/// §4.9: reconstructs `(identifier, qualifier_path)` from a decompressed
/// link for re-entry into the pipeline.
pub async fn decompress_entry(
    toolkit: &dyn ToolkitAdapter,
    compressed_segment: &str,
) -> Result<(String, Option<String>), ResolverError> {
    let result = toolkit
        .uncompress(compressed_segment)
        .await
        .map_err(ResolverError::Validation)?;
    let first = result
        .identifiers
        .first()
        .ok_or_else(|| ResolverError::Validation("decompressed link has no identifier".to_string()))?;
    let (ai, value) = first
        .iter()
        .next()
        .ok_or_else(|| ResolverError::Validation("decompressed identifier is empty".to_string()))?;
    let identifier = format!("/{ai}/{value}");
    let qualifier_path = if result.qualifiers.is_empty() {
        None
    } else {
        let mut path = String::new();
        for q in &result.qualifiers {
            for (k, v) in q {
                path.push_str(&format!("/{k}/{v}"));
            }
        }
        Some(path)
    };
    Ok((identifier, qualifier_path))
}

fn normalize_gtin_13_to_14(identifier: &str) -> String {
    if let Some(rest) = identifier.strip_prefix("/01/") {
        let value_end = rest.find('/').unwrap_or(rest.len());
        let (value, tail) = rest.split_at(value_end);
        if value.len() == 13 && value.chars().all(|c| c.is_ascii_digit()) {
            return format!("/01/0{value}{tail}");
        }
    }
    identifier.to_string()
}

fn split_ai_value(identifier: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = identifier.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return None;
    }
    Some((segments[0].to_string(), segments[1].to_string()))
}

/// §4.5.1: a candidate doc qualifier map matches request qualifiers `R` when
/// every `(k, dv)` in the candidate either binds a template `{name}` or
/// equals the request's value for `k` literally.
fn match_qualifiers(candidate: &[Qualifier], request: &[Qualifier]) -> Option<HashMap<String, String>> {
    let request_flat: HashMap<&str, &str> = request
        .iter()
        .flat_map(|q| q.iter())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut bindings = HashMap::new();
    for qmap in candidate {
        for (k, dv) in qmap {
            let Some(rv) = request_flat.get(k.as_str()) else {
                return None;
            };
            if let Some(name) = dv.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                bindings.insert(name.to_string(), rv.to_string());
            } else if dv != rv {
                return None;
            }
        }
    }
    Some(bindings)
}

/// §4.5 step 7: serializes filtered items to text, textually substitutes
/// `{name}` tokens, and parses back.
fn substitute_templates(
    items: &[crate::model::DataItem],
    bindings: &HashMap<String, String>,
) -> Result<Vec<crate::model::DataItem>, anyhow::Error> {
    let mut text = serde_json::to_string(items)?;
    for (name, value) in bindings {
        text = text.replace(&format!("{{{name}}}"), value);
    }
    Ok(serde_json::from_str(&text)?)
}

fn substitute_href(href: &str, bindings: &HashMap<String, String>) -> String {
    let mut out = href.to_string();
    for (name, value) in bindings {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// §4.5.2.
fn normalize_linktype(raw: &str) -> String {
    if raw == "*" || raw.eq_ignore_ascii_case("all") {
        return raw.to_string();
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    if let Some(suffix) = raw.strip_prefix("gs1:") {
        return format!("https://gs1.org/voc/{suffix}");
    }
    format!("https://gs1.org/voc/{raw}")
}

/// §4.5.3: joins preserved query params (all but linktype/compress/context,
/// case-insensitive) onto the target, respecting whether it already has a
/// query string.
fn append_preserved_query(target: &str, query_params: &[(String, String)]) -> String {
    let preserved: Vec<&(String, String)> = query_params
        .iter()
        .filter(|(k, _)| !QUERY_EXCLUDED.iter().any(|ex| ex.eq_ignore_ascii_case(k)))
        .collect();
    if preserved.is_empty() {
        return target.to_string();
    }
    let joined: String = preserved.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    if target.contains('?') {
        format!("{target}&{joined}")
    } else {
        format!("{target}?{joined}")
    }
}

fn merge_filtered_link_types(items: &[crate::model::DataItem]) -> Vec<(String, Vec<LinksetEntry>)> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Vec<LinksetEntry>> = HashMap::new();
    for item in items {
        for (key, entries) in &item.linkset.link_types {
            if !merged.contains_key(key) {
                order.push(key.clone());
            }
            merged.entry(key.clone()).or_default().extend(entries.clone());
        }
    }
    order.into_iter().map(|k| { let v = merged.remove(&k).unwrap(); (k, v) }).collect()
}

/// §4.5 step 4: iteratively shortens a serialized identifier's value from
/// the right, looking up `/ai/prefix`; on a match, binds the stripped
/// suffix to `{0}`/`{1}` if the stored document's text contains either
/// token.
async fn serialized_partial_match(
    store: &Arc<dyn DocumentStore>,
    ai_code: &str,
    value: &str,
) -> Result<Option<(crate::store::Versioned<crate::model::ResolverDocument>, HashMap<String, String>, String)>, ResolverError> {
    let chars: Vec<char> = value.chars().collect();
    for len in (1..chars.len()).rev() {
        let prefix: String = chars[..len].iter().collect();
        let suffix: String = chars[len..].iter().collect();
        let shortened_identifier = format!("/{ai_code}/{prefix}");
        let id = path_to_id(&shortened_identifier)?;
        if let Some(versioned) = store.get(&id).await? {
            let text = serde_json::to_string(&versioned.value).unwrap_or_default();
            let mut bindings = HashMap::new();
            if text.contains("{0}") {
                bindings.insert("0".to_string(), suffix.clone());
            }
            if text.contains("{1}") {
                bindings.insert("1".to_string(), suffix.clone());
            }
            return Ok(Some((versioned, bindings, shortened_identifier)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_gtin_pads_13_digit_value() {
        assert_eq!(normalize_gtin_13_to_14("/01/9506000134376"), "/01/09506000134376");
    }

    #[test]
    fn normalize_gtin_leaves_14_digit_value_untouched() {
        assert_eq!(normalize_gtin_13_to_14("/01/09506000134376"), "/01/09506000134376");
    }

    #[test]
    fn normalize_linktype_is_idempotent() {
        let once = normalize_linktype("gs1:pip");
        let twice = normalize_linktype(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn append_preserved_query_strips_excluded_params() {
        let out = append_preserved_query(
            "https://example.com/x",
            &[
                ("linktype".to_string(), "gs1:pip".to_string()),
                ("foo".to_string(), "bar".to_string()),
            ],
        );
        assert_eq!(out, "https://example.com/x?foo=bar");
    }

    #[test]
    fn append_preserved_query_appends_when_query_exists() {
        let out = append_preserved_query(
            "https://example.com/x?a=1",
            &[("b".to_string(), "2".to_string())],
        );
        assert_eq!(out, "https://example.com/x?a=1&b=2");
    }

    #[test]
    fn match_qualifiers_binds_template_values() {
        let mut candidate_q = Qualifier::new();
        candidate_q.insert("10".to_string(), "{lot}".to_string());
        let mut request_q = Qualifier::new();
        request_q.insert("10".to_string(), "LOT01".to_string());
        let bindings = match_qualifiers(&[candidate_q], &[request_q]).unwrap();
        assert_eq!(bindings.get("lot").unwrap(), "LOT01");
    }

    #[test]
    fn match_qualifiers_rejects_literal_mismatch() {
        let mut candidate_q = Qualifier::new();
        candidate_q.insert("10".to_string(), "LOT01".to_string());
        let mut request_q = Qualifier::new();
        request_q.insert("10".to_string(), "LOT02".to_string());
        assert!(match_qualifiers(&[candidate_q], &[request_q]).is_none());
    }
}
