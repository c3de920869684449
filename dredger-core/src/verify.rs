//! Candidate page verification.
//!
//! A candidate passes only when the page carries real recipe evidence:
//! JSON-LD with a `Recipe` type plus ingredients or instructions, or a
//! known recipe-plugin card in the markup. Everything else is rejected
//! with a human-readable reason, and only infrastructure trouble counts
//! as transient.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::config::DredgerConfig;
use crate::http::{is_transient_status, HttpClient};
use crate::language::detect_language;
use crate::types::Verdict;

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// File extensions that can never be recipe pages.
const NON_RECIPE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico", ".pdf", ".zip", ".mp4",
    ".webm", ".mov", ".avi", ".mkv",
];

/// Path fragments that mark listings, feeds, and asset directories.
const NON_RECIPE_PATH_HINTS: &[&str] = &[
    "/wp-content/uploads/",
    "/wp-json/",
    "/category/",
    "/tag/",
    "/author/",
    "/feed/",
];

/// Slug words that flag shop pages, roundups, and other non-recipes.
const BAD_KEYWORDS: &[&str] = &[
    "roundup", "collection", "guide", "review", "giveaway", "shop", "store", "product",
];

const COLLECTION_NOUNS: &str =
    "recipes|meals|dishes|ideas|desserts|appetizers|snacks|soups|salads|sides|cocktails|drinks";

static RECIPE_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(wp-recipe-maker|tasty-recipes|mv-create-card|recipe-card)")
        .expect("Invalid recipe class regex")
});

static SLUG_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]+").expect("Invalid slug separator regex"));

static HOW_TO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^how\s+to\s+(cook|make)\b").expect("Invalid how-to regex"));

static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(digest|meal plan|menu plan|weekly menu|week of|weekend reading|link love|friday favorites)\b",
    )
    .expect("Invalid digest regex")
});

static LISTICLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(top|best)\b.*\b({COLLECTION_NOUNS})\b"))
        .expect("Invalid listicle regex")
});

static NUMBERED_COLLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*\d{{1,3}}\b.*\b({COLLECTION_NOUNS})\b"))
        .expect("Invalid numbered collection regex")
});

static LISTICLE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(\b(top|best)\b|\b\d{{1,3}}\b).*\b({COLLECTION_NOUNS})\b"
    ))
    .expect("Invalid listicle title regex")
});

/// Cheap string-only screen applied before any network traffic. Returns
/// the rejection reason for URLs that cannot possibly be recipe pages.
pub fn pre_filter_candidate(url: &str) -> Option<&'static str> {
    let Ok(parsed) = Url::parse(url) else {
        return None;
    };
    let path = parsed.path().to_lowercase();

    if NON_RECIPE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Some("Non-HTML media URL");
    }
    if NON_RECIPE_PATH_HINTS.iter().any(|hint| path.contains(hint)) {
        return Some("Non-recipe path");
    }
    if path == "/blog" || path == "/blog/" {
        return Some("Blog index path");
    }
    None
}

pub struct RecipeVerifier {
    client: Arc<dyn HttpClient>,
    config: Arc<DredgerConfig>,
}

impl RecipeVerifier {
    pub fn new(client: Arc<dyn HttpClient>, config: Arc<DredgerConfig>) -> Self {
        Self { client, config }
    }

    /// Full verification of one candidate: pre-filter, fetch, schema
    /// evidence, language gate, then the paranoid slug and title filters.
    pub async fn verify_recipe(&self, url: &str) -> Verdict {
        if let Some(reason) = pre_filter_candidate(url) {
            return Verdict::reject(reason);
        }

        let response = match self.client.get(url, PAGE_TIMEOUT).await {
            Ok(response) => response,
            Err(err) => {
                return Verdict::Reject {
                    reason: err.to_string(),
                    transient: err.is_transient(),
                };
            }
        };
        if response.status != 200 {
            return Verdict::Reject {
                reason: format!("HTTP {}", response.status),
                transient: is_transient_status(response.status),
            };
        }

        let html = response.text();
        let document = Html::parse_document(&html);

        let (has_recipe_type, strong_payload) = recipe_schema_signal(&document);
        let has_card = has_recipe_card(&document);
        if !strong_payload && !has_card {
            if has_recipe_type {
                return Verdict::reject("Weak recipe schema");
            }
            return Verdict::reject("No recipe detected");
        }

        if self.config.language_filter_enabled && !self.config.target_language.is_empty() {
            let detected = detect_language(&document, self.config.language_min_confidence);
            match detected {
                Some(code) if code != self.config.target_language => {
                    return Verdict::reject(format!("Language mismatch: {code}"));
                }
                None if self.config.language_detection_strict => {
                    return Verdict::reject("Language unknown");
                }
                _ => {}
            }
        }

        if let Some(reason) = paranoid_skip(url, &page_title(&document)) {
            return Verdict::reject(reason);
        }

        Verdict::Accept
    }
}

/// Slug and title heuristics for pages that carry recipe markup but are
/// listicles, digests, or other collections rather than a single recipe.
fn paranoid_skip(url: &str, title: &str) -> Option<String> {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let slug = path
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let normalized_slug = SLUG_SEPARATOR_RE.replace_all(&slug, " ").into_owned();

    if HOW_TO_RE.is_match(&normalized_slug) {
        return Some("How-to article".to_string());
    }
    if DIGEST_RE.is_match(&normalized_slug) {
        return Some("Digest/non-recipe post".to_string());
    }
    if LISTICLE_RE.is_match(&normalized_slug) || NUMBERED_COLLECTION_RE.is_match(&normalized_slug) {
        return Some(format!("Listicle detected: {slug}"));
    }
    for keyword in BAD_KEYWORDS {
        if normalized_slug.contains(keyword) {
            return Some(format!("Bad keyword: {keyword}"));
        }
    }

    if HOW_TO_RE.is_match(title) {
        return Some("How-to title".to_string());
    }
    if DIGEST_RE.is_match(title) {
        return Some("Digest/non-recipe title".to_string());
    }
    if LISTICLE_TITLE_RE.is_match(title)
        || NUMBERED_COLLECTION_RE.is_match(title)
        || title.contains("best recipes")
        || title.contains("top 10")
    {
        return Some("Listicle title".to_string());
    }

    None
}

fn page_title(document: &Html) -> String {
    let selector = Selector::parse("title").expect("Invalid selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_lowercase())
        .unwrap_or_default()
}

/// Scan JSON-LD blocks for recipe evidence. Returns
/// `(has_recipe_type, strong_payload)`: whether any block declares the
/// Recipe type at all, and whether one also carries non-empty
/// ingredients or instructions.
fn recipe_schema_signal(document: &Html) -> (bool, bool) {
    let selector =
        Selector::parse("script[type='application/ld+json']").expect("Invalid selector");
    let mut has_recipe_type = false;

    for script in document.select(&selector) {
        let raw: String = script.text().collect();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let payload: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            // Some sites ship raw newlines inside JSON strings.
            Err(_) => match serde_json::from_str(&sanitize_json(raw)) {
                Ok(value) => value,
                Err(_) => continue,
            },
        };

        let mut items = Vec::new();
        collect_jsonld_items(&payload, &mut items);
        for item in items {
            let Some(object) = item.as_object() else {
                continue;
            };
            if !is_recipe_type(object.get("@type")) {
                continue;
            }
            has_recipe_type = true;
            if has_ingredients(object.get("recipeIngredient"))
                || has_instructions(object.get("recipeInstructions"))
            {
                return (true, true);
            }
        }
    }

    (has_recipe_type, false)
}

/// Flatten a JSON-LD payload into candidate objects, unwrapping `@graph`
/// containers and top-level arrays.
fn collect_jsonld_items<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(graph)) = map.get("@graph") {
                for entry in graph {
                    collect_jsonld_items(entry, out);
                }
            } else {
                out.push(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_jsonld_items(item, out);
            }
        }
        _ => {}
    }
}

fn is_recipe_type(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("recipe"),
        Some(Value::Array(items)) => items.iter().any(|item| is_recipe_type(Some(item))),
        _ => false,
    }
}

fn has_ingredients(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::String(s) if !s.trim().is_empty())),
        _ => false,
    }
}

fn has_instructions(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => items.iter().any(|item| match item {
            Value::String(s) => !s.trim().is_empty(),
            Value::Object(_) => step_has_text(item),
            _ => false,
        }),
        Some(object @ Value::Object(_)) => step_has_text(object),
        _ => false,
    }
}

fn step_has_text(step: &Value) -> bool {
    let Some(object) = step.as_object() else {
        return false;
    };
    if matches!(object.get("text"), Some(Value::String(s)) if !s.trim().is_empty()) {
        return true;
    }
    has_instructions(object.get("itemListElement"))
}

/// Markup fallback: any element carrying a class from the common recipe
/// plugins counts as recipe evidence even without structured data.
fn has_recipe_card(document: &Html) -> bool {
    let selector = Selector::parse("[class]").expect("Invalid selector");
    document
        .select(&selector)
        .any(|el| el.value().classes().any(|class| RECIPE_CLASS_RE.is_match(class)))
}

/// Escape bare control characters inside JSON string literals so the
/// block still parses.
fn sanitize_json(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut prev = '\0';

    for c in raw.chars() {
        if c == '"' && prev != '\\' {
            in_string = !in_string;
            out.push(c);
        } else if in_string {
            match c {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
        prev = c;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockClient;
    use crate::types::Verdict;

    fn verifier_with(client: MockClient, config: DredgerConfig) -> RecipeVerifier {
        RecipeVerifier::new(Arc::new(client), Arc::new(config))
    }

    fn verifier(client: MockClient) -> RecipeVerifier {
        verifier_with(client, DredgerConfig::default())
    }

    fn recipe_page(jsonld: &str) -> String {
        format!(
            "<html lang=\"en-US\"><head><title>Apple Pie</title>\
             <script type=\"application/ld+json\">{jsonld}</script>\
             </head><body><p>A family favorite.</p></body></html>"
        )
    }

    const STRONG_RECIPE: &str = r#"{"@type":"Recipe","name":"Apple Pie","recipeIngredient":["4 apples","1 crust"],"recipeInstructions":"Bake it."}"#;

    fn reason_of(verdict: Verdict) -> (String, bool) {
        match verdict {
            Verdict::Reject { reason, transient } => (reason, transient),
            Verdict::Accept => panic!("expected rejection"),
        }
    }

    #[test]
    fn pre_filter_screens_obvious_non_recipes() {
        assert_eq!(
            pre_filter_candidate("https://example.com/images/pie.JPG"),
            Some("Non-HTML media URL")
        );
        assert_eq!(
            pre_filter_candidate("https://example.com/wp-content/uploads/2024/pie.html"),
            Some("Non-recipe path")
        );
        assert_eq!(
            pre_filter_candidate("https://example.com/tag/desserts"),
            Some("Non-recipe path")
        );
        assert_eq!(
            pre_filter_candidate("https://example.com/blog/"),
            Some("Blog index path")
        );
        assert_eq!(pre_filter_candidate("https://example.com/blog-cherry-cake"), None);
        assert_eq!(pre_filter_candidate("https://example.com/apple-pie"), None);
    }

    #[test]
    fn paranoid_skip_slugs() {
        assert_eq!(
            paranoid_skip("https://example.com/how-to-cook-rice", ""),
            Some("How-to article".to_string())
        );
        assert_eq!(
            paranoid_skip("https://example.com/10-best-dinner-ideas", ""),
            Some("Listicle detected: 10-best-dinner-ideas".to_string())
        );
        assert_eq!(
            paranoid_skip("https://example.com/holiday-gift-guide", ""),
            Some("Bad keyword: guide".to_string())
        );
        assert_eq!(
            paranoid_skip("https://example.com/weekly-menu-plan-42", ""),
            Some("Digest/non-recipe post".to_string())
        );
        assert_eq!(paranoid_skip("https://example.com/grandmas-apple-pie", ""), None);
    }

    #[test]
    fn paranoid_skip_titles() {
        assert_eq!(
            paranoid_skip(
                "https://example.com/fall-favorites",
                "25 best soup recipes for fall"
            ),
            Some("Listicle title".to_string())
        );
        assert_eq!(
            paranoid_skip("https://example.com/marinara", "how to make marinara at home"),
            Some("How-to title".to_string())
        );
        assert_eq!(
            paranoid_skip("https://example.com/pie", "grandma's apple pie"),
            None
        );
    }

    #[tokio::test]
    async fn strong_schema_accepts() {
        let url = "https://example.com/apple-pie";
        let client = MockClient::new().with_html(url, &recipe_page(STRONG_RECIPE));
        assert_eq!(verifier(client).verify_recipe(url).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn recipe_inside_graph_accepts() {
        let url = "https://example.com/apple-pie";
        let jsonld = r#"{"@context":"https://schema.org","@graph":[{"@type":"WebSite","name":"x"},{"@type":["Recipe","NewsArticle"],"recipeInstructions":[{"@type":"HowToSection","itemListElement":[{"text":"Chop the apples."}]}]}]}"#;
        let client = MockClient::new().with_html(url, &recipe_page(jsonld));
        assert_eq!(verifier(client).verify_recipe(url).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn type_without_payload_is_weak() {
        let url = "https://example.com/apple-pie";
        let jsonld = r#"{"@type":"Recipe","name":"Apple Pie","recipeIngredient":[]}"#;
        let client = MockClient::new().with_html(url, &recipe_page(jsonld));
        let (reason, transient) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "Weak recipe schema");
        assert!(!transient);
    }

    #[tokio::test]
    async fn page_without_signal_is_rejected() {
        let url = "https://example.com/apple-pie";
        let client = MockClient::new().with_html(
            url,
            "<html lang=\"en\"><body><p>Just a story about pie.</p></body></html>",
        );
        let (reason, _) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "No recipe detected");
    }

    #[tokio::test]
    async fn plugin_class_counts_without_structured_data() {
        let url = "https://example.com/apple-pie";
        let client = MockClient::new().with_html(
            url,
            "<html lang=\"en\"><body><div class=\"wprm-container wp-recipe-maker\">\
             <p>Ingredients below.</p></div></body></html>",
        );
        assert_eq!(verifier(client).verify_recipe(url).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn http_status_maps_to_transience() {
        let url_404 = "https://example.com/gone";
        let url_503 = "https://example.com/busy";
        let client = MockClient::new()
            .with_status(url_404, 404, "")
            .with_status(url_503, 503, "");
        let verifier = verifier(client);

        let (reason, transient) = reason_of(verifier.verify_recipe(url_404).await);
        assert_eq!(reason, "HTTP 404");
        assert!(!transient);

        let (reason, transient) = reason_of(verifier.verify_recipe(url_503).await);
        assert_eq!(reason, "HTTP 503");
        assert!(transient);
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let url = "https://example.com/slow";
        let client = MockClient::new().with_timeout(url);
        let (reason, transient) = reason_of(verifier(client).verify_recipe(url).await);
        assert!(reason.starts_with("Timeout"));
        assert!(transient);
    }

    #[tokio::test]
    async fn language_mismatch_rejects() {
        let url = "https://example.com/tarte-aux-pommes";
        let page = format!(
            "<html lang=\"fr-FR\"><head><title>Tarte</title>\
             <script type=\"application/ld+json\">{STRONG_RECIPE}</script></head><body></body></html>"
        );
        let client = MockClient::new().with_html(url, &page);
        let (reason, transient) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "Language mismatch: fr");
        assert!(!transient);
    }

    #[tokio::test]
    async fn strict_mode_rejects_undetectable_language() {
        let url = "https://example.com/apple-pie";
        // Recipe markup but no language declaration and no visible text.
        let page = format!(
            "<html><head><script type=\"application/ld+json\">{STRONG_RECIPE}</script>\
             </head><body></body></html>"
        );
        let client = MockClient::new().with_html(url, &page);
        let (reason, _) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "Language unknown");
    }

    #[tokio::test]
    async fn lenient_mode_accepts_undetectable_language() {
        let url = "https://example.com/apple-pie";
        let page = format!(
            "<html><head><script type=\"application/ld+json\">{STRONG_RECIPE}</script>\
             </head><body></body></html>"
        );
        let client = MockClient::new().with_html(url, &page);
        let config = DredgerConfig {
            language_detection_strict: false,
            ..Default::default()
        };
        assert_eq!(
            verifier_with(client, config).verify_recipe(url).await,
            Verdict::Accept
        );
    }

    #[tokio::test]
    async fn language_filter_can_be_disabled() {
        let url = "https://example.com/tarte-aux-pommes";
        let page = format!(
            "<html lang=\"fr\"><head><script type=\"application/ld+json\">{STRONG_RECIPE}</script>\
             </head><body></body></html>"
        );
        let client = MockClient::new().with_html(url, &page);
        let config = DredgerConfig {
            language_filter_enabled: false,
            ..Default::default()
        };
        assert_eq!(
            verifier_with(client, config).verify_recipe(url).await,
            Verdict::Accept
        );
    }

    #[tokio::test]
    async fn listicle_slug_rejected_even_with_recipe_markup() {
        let url = "https://example.com/10-best-dinner-ideas";
        let client = MockClient::new().with_html(url, &recipe_page(STRONG_RECIPE));
        let (reason, _) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "Listicle detected: 10-best-dinner-ideas");
    }

    #[tokio::test]
    async fn listicle_title_rejected() {
        let url = "https://example.com/fall-comfort-food";
        let page = format!(
            "<html lang=\"en\"><head><title>30 Top Fall Soup Recipes</title>\
             <script type=\"application/ld+json\">{STRONG_RECIPE}</script></head><body></body></html>"
        );
        let client = MockClient::new().with_html(url, &page);
        let (reason, _) = reason_of(verifier(client).verify_recipe(url).await);
        assert_eq!(reason, "Listicle title");
    }

    #[test]
    fn sanitize_json_escapes_bare_newlines() {
        let broken = "{\"name\": \"Pie\nCrust\"}";
        let fixed = sanitize_json(broken);
        let value: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["name"], "Pie\nCrust");
    }
}
