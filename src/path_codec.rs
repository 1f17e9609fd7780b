use crate::error::ResolverError;
use crate::model::Qualifier;

/// `/01/123/21/X` -> `01_123_21_X`. Fails on an empty or whitespace-only path.
pub fn path_to_id(path: &str) -> Result<String, ResolverError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ResolverError::Validation("empty anchor path".into()));
    }
    Ok(segments.join("_"))
}

/// `01_123_21_X` -> `/01/123/21/X`.
pub fn id_to_path(id: &str) -> String {
    format!("/{}", id.replace('_', "/"))
}

/// Splits a qualifier-path tail into `(ai, value)` pairs. An odd trailing
/// segment with no paired value is silently dropped.
pub fn parse_qualifier_path(q: &str) -> Vec<Qualifier> {
    let segments: Vec<&str> = q.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    let mut chunks = segments.chunks_exact(2);
    for pair in &mut chunks {
        let mut map = Qualifier::new();
        map.insert(pair[0].to_string(), pair[1].to_string());
        out.push(map);
    }
    out
}
