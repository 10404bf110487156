use scraper::{Html, Selector};

/// Common content containers, most specific first.
pub const DEFAULT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    "#content",
    ".post-content",
    ".entry-content",
    ".article-content",
    ".article-body",
    ".post-body",
    ".content",
    ".post",
    ".article",
];

/// Ordered candidate selectors consulted first-match-wins.
///
/// The configured selector, when present and valid, comes first, followed by
/// the default list. Selectors that fail to parse are kept aside in
/// [`invalid`](Self::invalid) so callers can report them.
#[derive(Debug, Clone)]
pub struct SelectorChain {
    candidates: Vec<(String, Selector)>,
    invalid: Vec<String>,
}

/// Result of filtering one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    /// Outer HTML of the matched element, or the input unchanged.
    pub html: String,
    /// The selector that matched; `None` means the document was kept whole.
    pub matched: Option<String>,
}

impl SelectorChain {
    pub fn new(configured: Option<&str>) -> Self {
        Self::with_candidates(configured, DEFAULT_SELECTORS)
    }

    pub fn with_candidates(configured: Option<&str>, defaults: &[&str]) -> Self {
        let mut candidates = Vec::with_capacity(defaults.len() + 1);
        let mut invalid = Vec::new();

        let configured = configured.map(str::trim).filter(|s| !s.is_empty());
        for source in configured.into_iter().chain(defaults.iter().copied()) {
            match Selector::parse(source) {
                Ok(selector) => candidates.push((source.to_string(), selector)),
                Err(e) => {
                    tracing::warn!(selector = %source, error = ?e, "Invalid CSS selector");
                    invalid.push(source.to_string());
                }
            }
        }

        Self {
            candidates,
            invalid,
        }
    }

    /// Candidate selectors in the order they are tried.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|(source, _)| source.as_str())
    }

    pub fn invalid(&self) -> &[String] {
        &self.invalid
    }

    /// Reduces `html` to the first element matched by the first matching candidate.
    ///
    /// Never fails: with no match the document is returned unchanged.
    pub fn apply(&self, html: &str) -> Filtered {
        let document = Html::parse_document(html);

        for (source, selector) in &self.candidates {
            if let Some(element) = document.select(selector).next() {
                tracing::trace!(selector = %source, "Content filter matched");
                return Filtered {
                    html: element.html(),
                    matched: Some(source.clone()),
                };
            }
        }

        Filtered {
            html: html.to_string(),
            matched: None,
        }
    }
}

/// Filters with `configured` followed by [`DEFAULT_SELECTORS`].
pub fn filter_html(html: &str, configured: Option<&str>) -> Filtered {
    SelectorChain::new(configured).apply(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html><head><title>T</title></head><body>
<nav>menu</nav>
<div class="post-content"><p>first</p></div>
<article id="a1"><p>story</p></article>
<article id="a2"><p>second</p></article>
</body></html>"#;

    #[test]
    fn test_configured_selector_wins() {
        let filtered = filter_html(PAGE, Some(".post-content"));
        assert_eq!(filtered.matched.as_deref(), Some(".post-content"));
        assert!(filtered.html.contains("first"));
        assert!(!filtered.html.contains("story"));
    }

    #[test]
    fn test_first_match_in_document_order() {
        let filtered = filter_html(PAGE, None);
        assert_eq!(filtered.matched.as_deref(), Some("article"));
        assert!(filtered.html.starts_with("<article id=\"a1\">"));
        assert!(!filtered.html.contains("second"));
    }

    #[test]
    fn test_configured_selector_without_match_falls_through() {
        let filtered = filter_html(PAGE, Some("#does-not-exist"));
        assert_eq!(filtered.matched.as_deref(), Some("article"));
    }

    #[test]
    fn test_no_match_keeps_document() {
        let html = "<html><body><div><p>plain</p></div></body></html>";
        let chain = SelectorChain::with_candidates(None, &["article", "main"]);
        let filtered = chain.apply(html);
        assert_eq!(filtered.matched, None);
        assert_eq!(filtered.html, html);
    }

    #[test]
    fn test_invalid_configured_selector_reported() {
        let chain = SelectorChain::new(Some("div[[["));
        assert_eq!(chain.invalid(), ["div[[[".to_string()]);
        assert_eq!(chain.candidates().next(), Some("article"));
    }

    #[test]
    fn test_candidates_are_substitutable() {
        let chain = SelectorChain::with_candidates(Some("nav"), &["footer"]);
        let order: Vec<&str> = chain.candidates().collect();
        assert_eq!(order, vec!["nav", "footer"]);
        assert_eq!(chain.apply(PAGE).html, "<nav>menu</nav>");
    }

    #[test]
    fn test_blank_configured_selector_ignored() {
        let chain = SelectorChain::with_candidates(Some("   "), &["main"]);
        assert_eq!(chain.candidates().collect::<Vec<_>>(), vec!["main"]);
        assert!(chain.invalid().is_empty());
    }

    #[test]
    fn test_empty_document() {
        let filtered = filter_html("", None);
        assert_eq!(filtered.html, "");
        assert_eq!(filtered.matched, None);
    }
}
