//! Site list resolution.
//!
//! Precedence: an explicit `--sites` path (a missing file is a hard
//! error), then the `SITES` environment variable (a file path when one
//! exists at that location, otherwise a comma-separated inline list),
//! then `./sites.json`, then the built-in defaults.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

const LOCAL_SITES_FILE: &str = "sites.json";

/// Starter set used when nothing else configures a site list.
const DEFAULT_SITES: &[&str] = &[
    "https://www.seriouseats.com",
    "https://www.wellplated.com",
    "https://www.recipetineats.com",
];

/// Resolve the list of sites to dredge this run.
pub fn resolve_sites(cli_path: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = cli_path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read sites file {}", path.display()))?;
        let sites = parse_sites_json(&text)
            .with_context(|| format!("could not parse sites file {}", path.display()))?;
        return Ok(sites);
    }

    if let Ok(value) = env::var("SITES") {
        let value = value.trim();
        if !value.is_empty() {
            if Path::new(value).exists() {
                let text = std::fs::read_to_string(value)
                    .with_context(|| format!("could not read sites file {value}"))?;
                return parse_sites_json(&text)
                    .with_context(|| format!("could not parse sites file {value}"));
            }
            return Ok(keep_http(value.split(',').map(str::trim)));
        }
    }

    if Path::new(LOCAL_SITES_FILE).exists() {
        let text = std::fs::read_to_string(LOCAL_SITES_FILE)
            .with_context(|| format!("could not read {LOCAL_SITES_FILE}"))?;
        return parse_sites_json(&text).with_context(|| format!("could not parse {LOCAL_SITES_FILE}"));
    }

    Ok(DEFAULT_SITES.iter().map(|s| s.to_string()).collect())
}

/// Parse a site list document: either a bare JSON array of URLs or an
/// object with a `sites` array. Entries that are not `http(s)` URLs are
/// dropped.
fn parse_sites_json(text: &str) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(text)?;
    let entries = match &value {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => map
            .get("sites")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };
    Ok(keep_http(entries.iter().filter_map(Value::as_str)))
}

fn keep_http<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<String> {
    entries
        .map(|entry| entry.trim().trim_end_matches('/').to_string())
        .filter(|entry| entry.starts_with("http://") || entry.starts_with("https://"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_array_parses() {
        let sites = parse_sites_json(r#"["https://a.example.com", "https://b.example.com/"]"#)
            .unwrap();
        assert_eq!(sites, vec!["https://a.example.com", "https://b.example.com"]);
    }

    #[test]
    fn wrapped_object_parses() {
        let sites =
            parse_sites_json(r#"{"sites": ["https://a.example.com"], "comment": "x"}"#).unwrap();
        assert_eq!(sites, vec!["https://a.example.com"]);
    }

    #[test]
    fn non_http_entries_are_dropped() {
        let sites = parse_sites_json(
            r#"["https://a.example.com", "ftp://b.example.com", "not a url", 42]"#,
        )
        .unwrap();
        assert_eq!(sites, vec!["https://a.example.com"]);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_sites_json("{not json").is_err());
    }

    #[test]
    fn missing_cli_path_is_an_error() {
        assert!(resolve_sites(Some(Path::new("/nonexistent/sites.json"))).is_err());
    }
}
