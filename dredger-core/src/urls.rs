//! URL canonicalization.
//!
//! Every store key, duplicate check, and dedupe set in the pipeline goes
//! through [`canonicalize_url`] so that trivially different spellings of
//! the same page collapse to one identity.

use url::Url;

/// Query keys dropped outright during canonicalization, beyond the
/// `utm_*` prefix family.
const TRACKING_KEYS: &[&str] = &[
    "fbclid", "gclid", "igshid", "mc_cid", "mc_eid", "ref", "ref_src", "ref_url", "s", "spm",
];

/// Reduce a URL to its canonical form.
///
/// Lowercases scheme and host, strips a leading `www.`, collapses
/// duplicate slashes, removes the trailing slash (root stays `/`), drops
/// the fragment and tracking query parameters, and sorts what remains of
/// the query. Unparseable input degrades to a lowercased trimmed copy;
/// empty input stays empty. Idempotent.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return trimmed.to_lowercase(),
    };
    let host = match parsed.host_str() {
        Some(host) => host.to_lowercase(),
        None => return trimmed.to_lowercase(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut path = collapse_slashes(parsed.path());
    if path != "/" {
        path.truncate(path.trim_end_matches('/').len());
    }

    let query = parsed.query().and_then(|query| {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| !is_tracking_key(key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort();
        let mut encoded = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            encoded.append_pair(key, value);
        }
        Some(encoded.finish())
    });

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(&path);
    if let Some(query) = query {
        out.push('?');
        out.push_str(&query);
    }
    out
}

/// Host (plus explicit port) of a URL, lowercased. Empty string when the
/// URL does not parse; callers treat that as "no domain to throttle".
pub fn domain_of(url: &str) -> String {
    let parsed = match Url::parse(url.trim()) {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host.to_lowercase(), port),
        (Some(host), None) => host.to_lowercase(),
        (None, _) => String::new(),
    }
}

fn is_tracking_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || TRACKING_KEYS.contains(&key.as_str())
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push(ch);
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    out
}
