//! HTML to XHTML body serialization.
//!
//! E-book readers parse chapters as XML, so arbitrary web HTML has to be
//! re-serialized: every element closed, void elements self-closed, text and
//! attribute values escaped. The same pass removes embedded players and
//! scripts, points `<img>` at archived copies, and absolutizes links.

use crate::util::{resolve_reference, strip_control_chars};
use quick_xml::escape::escape;
use scraper::{ElementRef, Html, Node};
use std::collections::HashMap;
use url::Url;

/// Elements removed together with everything inside them.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "source", "noscript", "object", "embed", "frame", "frameset",
    "template", "link", "meta", "base", "form", "button", "input", "select", "textarea",
];

const VOID_ELEMENTS: &[&str] = &["area", "br", "col", "hr", "img", "track", "wbr"];

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const MATHML_NAMESPACE: &str = "http://www.w3.org/1998/Math/MathML";

/// Serializes the body of `html` as well-formed XHTML.
///
/// `images` maps an image URL, as `<img src>` resolves against `base`, to the
/// archived path. Images without an entry are dropped, so passing an empty
/// map removes all images. Relative `href`s resolve against `base` too.
pub fn to_xhtml(html: &str, base: Option<&Url>, images: &HashMap<String, String>) -> String {
    let document = Html::parse_document(html);
    let Some(body) = document
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
    else {
        return String::new();
    };

    let mut out = String::with_capacity(html.len());
    // (node, closing): a closing entry emits the end tag once the children are done.
    let mut stack: Vec<_> = body.children().rev().map(|node| (node, false)).collect();

    while let Some((node, closing)) = stack.pop() {
        if closing {
            if let Some(element) = node.value().as_element() {
                out.push_str("</");
                out.push_str(element.name());
                out.push('>');
            }
            continue;
        }

        match node.value() {
            Node::Text(text) => out.push_str(&escape(strip_control_chars(text).as_ref())),
            Node::Element(element) => {
                let name = element.name();
                if DROPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if !is_xml_name(name) {
                    // Unwrap unknown markup, keep its content.
                    stack.extend(node.children().rev().map(|child| (child, false)));
                    continue;
                }

                if name == "img" {
                    let archived = element
                        .attr("src")
                        .and_then(|src| resolve_reference(src, base))
                        .and_then(|url| images.get(url.as_str()));
                    if let Some(local) = archived {
                        out.push_str("<img src=\"");
                        out.push_str(&escape(local.as_str()));
                        out.push_str("\" alt=\"");
                        let alt = element.attr("alt").unwrap_or_default();
                        out.push_str(&escape(strip_control_chars(alt).as_ref()));
                        out.push_str("\"/>");
                    }
                    continue;
                }

                out.push('<');
                out.push_str(name);
                let namespace = match name {
                    "svg" => Some(SVG_NAMESPACE),
                    "math" => Some(MATHML_NAMESPACE),
                    _ => None,
                };
                if let Some(ns) = namespace {
                    out.push_str(" xmlns=\"");
                    out.push_str(ns);
                    out.push('"');
                }

                for (key, value) in element.attrs() {
                    if key == "xmlns" || !keep_attribute(key, value) {
                        continue;
                    }
                    let value = match key {
                        "href" => absolutize(value, base),
                        _ => value.to_string(),
                    };
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape(strip_control_chars(&value).as_ref()));
                    out.push('"');
                }

                if VOID_ELEMENTS.contains(&name) {
                    out.push_str("/>");
                    continue;
                }

                out.push('>');
                stack.push((node, true));
                stack.extend(node.children().rev().map(|child| (child, false)));
            }
            _ => {}
        }
    }

    out
}

fn keep_attribute(key: &str, value: &str) -> bool {
    if !is_xml_name(key) || key.starts_with("on") {
        return false;
    }
    if matches!(key, "srcset" | "sizes" | "loading" | "decoding") {
        return false;
    }
    !(matches!(key, "href" | "src") && value.trim_start().to_ascii_lowercase().starts_with("javascript:"))
}

fn absolutize(href: &str, base: Option<&Url>) -> String {
    let trimmed = href.trim();
    if trimmed.starts_with('#') || trimmed.starts_with("mailto:") {
        return trimmed.to_string();
    }
    resolve_reference(trimmed, base)
        .map(String::from)
        .unwrap_or_else(|| trimmed.to_string())
}

/// Simple XML name without namespace prefix: a letter or `_`, then letters, digits, `-`, `_`, `.`.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn convert(html: &str) -> String {
        to_xhtml(html, None, &HashMap::new())
    }

    #[test]
    fn test_void_elements_self_closed() {
        assert_eq!(convert("<p>a<br>b</p><hr>"), "<p>a<br/>b</p><hr/>");
    }

    #[test]
    fn test_unclosed_elements_are_closed() {
        assert_eq!(convert("<ul><li>one<li>two</ul>"), "<ul><li>one</li><li>two</li></ul>");
    }

    #[test]
    fn test_text_is_escaped() {
        assert_eq!(convert("<p>a &lt; b &amp; c</p>"), "<p>a &lt; b &amp; c</p>");
    }

    #[test]
    fn test_dangerous_elements_removed() {
        let html = r#"<p>keep</p><script>alert(1)</script><iframe src="x"></iframe>
<video><source src="v.mp4"></video><p onclick="x()">too</p>"#;
        assert_eq!(convert(html), "<p>keep</p>\n<video></video><p>too</p>");
    }

    #[test]
    fn test_images_rewritten_or_dropped() {
        let base = Url::parse("https://example.com/posts/").unwrap();
        let mut images = HashMap::new();
        images.insert(
            "https://example.com/a.png".to_string(),
            "images/0011223344556677.png".to_string(),
        );

        let html = r#"<p><img src="/a.png" alt="A" srcset="x 2x"><img src="../a.png"><img src="/b.png"></p>"#;
        assert_eq!(
            to_xhtml(html, Some(&base), &images),
            concat!(
                r#"<p><img src="images/0011223344556677.png" alt="A"/>"#,
                r#"<img src="images/0011223344556677.png" alt=""/></p>"#
            )
        );
    }

    #[test]
    fn test_empty_map_drops_all_images() {
        assert_eq!(convert(r#"<p>x<img src="https://e.com/i.png"></p>"#), "<p>x</p>");
    }

    #[test]
    fn test_links_absolutized() {
        let base = Url::parse("https://blog.example.com/posts/1").unwrap();
        let html = r##"<a href="/about">a</a><a href="#top">b</a><a href="javascript:void(0)">c</a>"##;
        assert_eq!(
            to_xhtml(html, Some(&base), &HashMap::new()),
            r##"<a href="https://blog.example.com/about">a</a><a href="#top">b</a><a>c</a>"##
        );
    }

    #[test]
    fn test_svg_gets_namespace() {
        let out = convert(r#"<svg viewBox="0 0 1 1"><circle r="1"></circle></svg>"#);
        assert_eq!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 1 1"><circle r="1"></circle></svg>"#
        );
    }

    #[test]
    fn test_attribute_values_escaped() {
        assert_eq!(
            convert(r#"<p title="a &quot;b&quot; <c>">x</p>"#),
            r#"<p title="a &quot;b&quot; &lt;c&gt;">x</p>"#
        );
    }

    #[test]
    fn test_control_characters_stripped() {
        assert_eq!(convert("<p>a\u{1}b</p>"), "<p>ab</p>");
    }

    #[test]
    fn test_head_is_ignored() {
        let html = "<html><head><title>T</title></head><body><main>m</main></body></html>";
        assert_eq!(convert(html), "<main>m</main>");
    }

    #[test]
    fn test_deeply_nested_markup() {
        let html = format!("{}x{}", "<div>".repeat(5_000), "</div>".repeat(5_000));
        let out = convert(&html);
        assert!(out.starts_with("<div><div>"));
        assert!(out.ends_with("</div></div>"));
    }

    #[test]
    fn test_is_xml_name() {
        assert!(is_xml_name("data-id"));
        assert!(!is_xml_name("1abc"));
        assert!(!is_xml_name("xlink:href"));
        assert!(!is_xml_name(""));
    }
}
