use crate::model::LinksetEntry;

#[derive(Debug, Clone, Default)]
pub struct NegotiationRequest {
    pub accept_languages: Vec<String>,
    pub context: Option<String>,
    pub media_types: Vec<String>,
    pub has_explicit_linktype: bool,
}

/// Strips a `;q=...` suffix and trims whitespace, as applied to every raw
/// header token before negotiation (SPEC_FULL §4.7).
pub fn clean_header_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tok| tok.split(';').next().unwrap_or("").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_default_media(media_types: &[String]) -> bool {
    media_types.is_empty()
        || media_types
            .iter()
            .all(|m| m == "*/*" || m == "text/*" || m == "application/*")
}

fn is_default_language(languages: &[String]) -> bool {
    languages.is_empty() || languages.iter().all(|l| l.eq_ignore_ascii_case("und"))
}

fn language_matches(entry: &LinksetEntry, tag: &str) -> bool {
    entry.hreflang.iter().any(|h| h.eq_ignore_ascii_case(tag))
}

fn language_prefix_matches(entry: &LinksetEntry, tag: &str) -> bool {
    let prefix = format!("{tag}-");
    entry
        .hreflang
        .iter()
        .any(|h| h.to_lowercase().starts_with(&prefix.to_lowercase()))
}

fn context_matches(entry: &LinksetEntry, context: &str) -> bool {
    entry.context.iter().any(|c| c.eq_ignore_ascii_case(context))
}

fn media_matches(entry: &LinksetEntry, requested: &str) -> bool {
    let Some(entry_type) = &entry.media_type else {
        return false;
    };
    if requested == "*/*" || entry_type.eq_ignore_ascii_case(requested) {
        return true;
    }
    if let Some(family) = requested.strip_suffix("/*") {
        return entry_type.to_lowercase().starts_with(&format!("{}/", family.to_lowercase()));
    }
    false
}

/// §4.7.1: iterates `accept_languages` in order; for each tag, prefers exact
/// `hreflang` matches, falling back to a `tag-` prefix match; returns the
/// first non-empty accumulation.
fn filter_by_language<'a>(entries: &[&'a LinksetEntry], tags: &[String]) -> Vec<&'a LinksetEntry> {
    for tag in tags {
        let exact: Vec<&LinksetEntry> = entries.iter().filter(|e| language_matches(e, tag)).copied().collect();
        if !exact.is_empty() {
            return exact;
        }
        // A generic/macrolanguage tag ("en") has no region subtag, so a
        // `tag-` prefix match against it would match every regional variant
        // at once and produce a false tie. Only region-qualified tags
        // ("en-IE") take part in the prefix pass.
        if !tag.contains('-') {
            continue;
        }
        let prefix: Vec<&LinksetEntry> = entries
            .iter()
            .filter(|e| language_prefix_matches(e, tag))
            .copied()
            .collect();
        if !prefix.is_empty() {
            return prefix;
        }
    }
    Vec::new()
}

fn filter_by_context<'a>(entries: &[&'a LinksetEntry], context: &str) -> Vec<&'a LinksetEntry> {
    entries.iter().filter(|e| context_matches(e, context)).copied().collect()
}

fn filter_by_media<'a>(entries: &[&'a LinksetEntry], media_types: &[String]) -> Vec<&'a LinksetEntry> {
    entries
        .iter()
        .filter(|e| media_types.iter().any(|m| media_matches(e, m)))
        .copied()
        .collect()
}

/// Runs the full negotiation ladder (SPEC_FULL §4.7) and returns the
/// selected entries, in their original relative order.
pub fn negotiate<'a>(entries: &'a [LinksetEntry], req: &NegotiationRequest) -> Vec<&'a LinksetEntry> {
    negotiate_traced(entries, req).0
}

/// Same as `negotiate`, but also reports which fallback rule (SPEC_FULL
/// §4.7) produced the result, so callers can feed it to
/// `MetricsState::negotiation_rules_hit_total`.
pub fn negotiate_traced<'a>(entries: &'a [LinksetEntry], req: &NegotiationRequest) -> (Vec<&'a LinksetEntry>, &'static str) {
    if entries.is_empty() {
        return (Vec::new(), "empty");
    }

    if !req.has_explicit_linktype
        && is_default_language(&req.accept_languages)
        && req.context.is_none()
        && is_default_media(&req.media_types)
    {
        return (vec![&entries[0]], "default_shortcut");
    }

    let all: Vec<&LinksetEntry> = entries.iter().collect();
    let has_language = !req.accept_languages.is_empty() && !is_default_language(&req.accept_languages);
    let has_context = req.context.is_some();
    let has_media = !req.media_types.is_empty() && !is_default_media(&req.media_types);

    if has_language && has_context && has_media {
        let by_lang = filter_by_language(&all, &req.accept_languages);
        let by_ctx = filter_by_context(&by_lang, req.context.as_deref().unwrap());
        let by_media = filter_by_media(&by_ctx, &req.media_types);
        if !by_media.is_empty() {
            return (by_media, "language_context_media");
        }
    }

    if has_language && has_context {
        let by_lang = filter_by_language(&all, &req.accept_languages);
        let by_ctx = filter_by_context(&by_lang, req.context.as_deref().unwrap());
        if !by_ctx.is_empty() {
            return (by_ctx, "language_context");
        }
    }

    if has_language && has_media {
        let by_lang = filter_by_language(&all, &req.accept_languages);
        let by_media = filter_by_media(&by_lang, &req.media_types);
        if !by_media.is_empty() {
            return (by_media, "language_media");
        }
    }

    if has_context && has_media {
        let by_ctx = filter_by_context(&all, req.context.as_deref().unwrap());
        let by_media = filter_by_media(&by_ctx, &req.media_types);
        if !by_media.is_empty() {
            return (by_media, "context_media");
        }
    }

    if has_language {
        let by_lang = filter_by_language(&all, &req.accept_languages);
        if !by_lang.is_empty() {
            return (by_lang, "language_only");
        }
    }

    if has_context {
        let by_ctx = filter_by_context(&all, req.context.as_deref().unwrap());
        if !by_ctx.is_empty() {
            return (by_ctx, "context_only");
        }
    }

    let und_lang: Vec<&LinksetEntry> = all.iter().filter(|e| e.hreflang.iter().any(|h| h.eq_ignore_ascii_case("und"))).copied().collect();
    if !und_lang.is_empty() {
        return (und_lang, "und_language");
    }

    if has_media {
        let by_media = filter_by_media(&all, &req.media_types);
        if !by_media.is_empty() {
            return (by_media, "media_only");
        }
    }

    let und_media: Vec<&LinksetEntry> = all
        .iter()
        .filter(|e| e.media_type.as_deref().map(|t| t.eq_ignore_ascii_case("und")).unwrap_or(false))
        .copied()
        .collect();
    if !und_media.is_empty() {
        return (und_media, "und_media");
    }

    (vec![&entries[0]], "fallback_first")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(href: &str, hreflang: &[&str], media_type: Option<&str>, context: &[&str]) -> LinksetEntry {
        LinksetEntry {
            href: href.to_string(),
            title: href.to_string(),
            media_type: media_type.map(|s| s.to_string()),
            hreflang: hreflang.iter().map(|s| s.to_string()).collect(),
            context: context.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn default_shortcut_returns_first_entry() {
        let entries = vec![entry("https://a", &[], None, &[]), entry("https://b", &[], None, &[])];
        let req = NegotiationRequest::default();
        let result = negotiate(&entries, &req);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].href, "https://a");
    }

    #[test]
    fn language_exact_match_preferred_over_prefix() {
        let entries = vec![
            entry("https://en-gb", &["en-GB"], None, &[]),
            entry("https://en-us", &["en-US"], None, &[]),
        ];
        let req = NegotiationRequest {
            accept_languages: vec!["en-IE".to_string(), "en".to_string(), "en-GB".to_string(), "en-US".to_string()],
            ..Default::default()
        };
        let result = negotiate(&entries, &req);
        // "en-IE" and "en" have no exact match; "en-GB" is exact -> selected.
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].href, "https://en-gb");
    }

    #[test]
    fn context_only_filters_by_context() {
        let entries = vec![
            entry("https://retail", &[], None, &["retail"]),
            entry("https://wholesale", &[], None, &["wholesale"]),
        ];
        let req = NegotiationRequest {
            context: Some("wholesale".to_string()),
            ..Default::default()
        };
        let result = negotiate(&entries, &req);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].href, "https://wholesale");
    }

    #[test]
    fn media_family_wildcard_matches() {
        let entries = vec![entry("https://json", &[], Some("application/json"), &[])];
        let req = NegotiationRequest {
            media_types: vec!["application/*".to_string()],
            has_explicit_linktype: true,
            ..Default::default()
        };
        let result = negotiate(&entries, &req);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn falls_back_to_first_entry_when_nothing_matches() {
        let entries = vec![entry("https://a", &["en"], None, &[]), entry("https://b", &["fr"], None, &[])];
        let req = NegotiationRequest {
            accept_languages: vec!["de".to_string()],
            context: Some("no-such-context".to_string()),
            ..Default::default()
        };
        let result = negotiate(&entries, &req);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].href, "https://a");
    }
}
