//! Page language detection.
//!
//! Declared metadata wins: the `<html lang>` attribute, language meta
//! tags, or a JSON-LD `inLanguage` field. Only when a page declares
//! nothing is the language inferred statistically from visible text.
//! All codes are reduced to the primary subtag, so `en-US` and `en-GB`
//! both read as `en`.

use scraper::{Html, Selector};
use serde_json::Value;
use whatlang::Lang;

/// Reduce a language tag to its primary subtag: `en-US` and `en_gb`
/// become `en`. Placeholder (`x-default`) and one-letter tags are
/// discarded.
pub fn normalize_language_code(value: &str) -> Option<String> {
    let cleaned = value.trim().to_lowercase().replace('_', "-");
    if cleaned.is_empty() || cleaned == "x-default" {
        return None;
    }
    let primary = cleaned.split('-').next().unwrap_or_default();
    if primary.len() < 2 {
        return None;
    }
    Some(primary.to_string())
}

/// Detect the page language: declared metadata first, statistical
/// fallback second. `None` means the page neither declares a language
/// nor contains enough text to call it with confidence.
pub fn detect_language(document: &Html, min_confidence: f64) -> Option<String> {
    if let Some(declared) = declared_language(document) {
        return Some(declared);
    }
    statistical_language(&visible_text_sample(document), min_confidence)
}

fn declared_language(document: &Html) -> Option<String> {
    let html_selector = Selector::parse("html").expect("Invalid selector");
    if let Some(root) = document.select(&html_selector).next() {
        if let Some(lang) = root.value().attr("lang") {
            if let Some(code) = normalize_language_code(lang) {
                return Some(code);
            }
        }
    }

    // First matching tag claims each slot, mirroring a priority order of
    // content-language, then a language meta name, then og:locale.
    let meta_selector = Selector::parse("meta").expect("Invalid selector");
    let mut content_language: Option<Option<String>> = None;
    let mut name_language: Option<Option<String>> = None;
    let mut og_locale: Option<Option<String>> = None;
    for meta in document.select(&meta_selector) {
        let element = meta.value();
        let normalized = || element.attr("content").and_then(normalize_language_code);
        if content_language.is_none()
            && element
                .attr("http-equiv")
                .is_some_and(|v| v.to_lowercase().contains("content-language"))
        {
            content_language = Some(normalized());
        }
        if name_language.is_none()
            && element
                .attr("name")
                .is_some_and(|v| v.to_lowercase().contains("language"))
        {
            name_language = Some(normalized());
        }
        if og_locale.is_none()
            && element
                .attr("property")
                .is_some_and(|v| v.to_lowercase().contains("og:locale"))
        {
            og_locale = Some(normalized());
        }
    }
    if let Some(code) = content_language
        .flatten()
        .or(name_language.flatten())
        .or(og_locale.flatten())
    {
        return Some(code);
    }

    declared_language_from_jsonld(document)
}

fn declared_language_from_jsonld(document: &Html) -> Option<String> {
    let script_selector = Selector::parse("script").expect("Invalid selector");
    for script in document.select(&script_selector) {
        let is_jsonld = script
            .value()
            .attr("type")
            .is_some_and(|t| t.contains("ld+json"));
        if !is_jsonld {
            continue;
        }
        let raw: String = script.text().collect();
        let Ok(payload) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        if let Some(code) = find_in_language(&payload) {
            return Some(code);
        }
    }
    None
}

fn find_in_language(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(declared) = map.get("inLanguage") {
                let found = match declared {
                    Value::Array(items) => items.iter().find_map(normalize_value),
                    other => normalize_value(other),
                };
                if found.is_some() {
                    return found;
                }
            }
            map.values().find_map(find_in_language)
        }
        Value::Array(items) => items.iter().find_map(find_in_language),
        _ => None,
    }
}

fn normalize_value(value: &Value) -> Option<String> {
    value.as_str().and_then(normalize_language_code)
}

/// Title, meta description, and the first 25 headline/paragraph texts,
/// whitespace-collapsed into one sample string.
fn visible_text_sample(document: &Html) -> String {
    let mut parts: Vec<String> = Vec::new();

    let title_selector = Selector::parse("title").expect("Invalid selector");
    if let Some(title) = document.select(&title_selector).next() {
        parts.push(title.text().collect());
    }

    let meta_selector = Selector::parse("meta").expect("Invalid selector");
    for meta in document.select(&meta_selector) {
        let is_description = meta
            .value()
            .attr("name")
            .is_some_and(|v| v.to_lowercase().contains("description"));
        if is_description {
            if let Some(content) = meta.value().attr("content") {
                parts.push(content.to_string());
            }
            break;
        }
    }

    let body_selector = Selector::parse("h1, h2, p").expect("Invalid selector");
    for element in document.select(&body_selector).take(25) {
        let text: Vec<&str> = element
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if !text.is_empty() {
            parts.push(text.join(" "));
        }
    }

    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn statistical_language(text: &str, min_confidence: f64) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let info = whatlang::detect(trimmed)?;
    if info.confidence() < min_confidence {
        return None;
    }
    Some(primary_subtag(info.lang()).to_string())
}

/// Two-letter code for the languages recipe sites actually publish in;
/// rarer detections keep their ISO 639-3 code and simply never match a
/// two-letter target.
fn primary_subtag(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Nob => "no",
        Lang::Rus => "ru",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Slk => "sk",
        Lang::Ukr => "uk",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh",
        Lang::Hun => "hu",
        Lang::Ron => "ro",
        Lang::Ell => "el",
        Lang::Bul => "bg",
        Lang::Hrv => "hr",
        Lang::Srp => "sr",
        Lang::Slv => "sl",
        Lang::Lit => "lt",
        Lang::Lav => "lv",
        Lang::Est => "et",
        Lang::Cat => "ca",
        Lang::Vie => "vi",
        Lang::Ind => "id",
        Lang::Tha => "th",
        Lang::Hin => "hi",
        other => other.code(),
    }
}
