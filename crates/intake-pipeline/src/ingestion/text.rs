//! Raw bytes and HTML pages to plain text

use scraper::{Html, Node};

/// Elements whose text never reaches the reader
const HIDDEN_ELEMENTS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

/// Decode bytes as UTF-8 (lossy), dropping a leading BOM
pub fn bytes_to_text(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.trim_start_matches('\u{feff}').to_string()
}

/// Whether a payload looks like an HTML page rather than a document
pub fn looks_like_html(content_type: Option<&str>, body: &str) -> bool {
    if content_type.is_some_and(|ct| ct.contains("text/html")) {
        return true;
    }
    let head: String = body.trim_start().chars().take(256).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Visible text of an HTML page, one text run per line
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_skips_scripts() {
        let html = r#"<!DOCTYPE html><html><head><title>T</title><style>p{}</style></head>
            <body><h1>Assignment 3</h1><script>var x = 1;</script>
            <p>1. Explain ownership.</p><p>2. What is a trait?</p></body></html>"#;
        let text = html_to_text(html);
        assert_eq!(text, "Assignment 3\n1. Explain ownership.\n2. What is a trait?");
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html(Some("text/html; charset=utf-8"), ""));
        assert!(looks_like_html(None, "  <!DOCTYPE html><html>"));
        assert!(!looks_like_html(Some("text/plain"), "Q1. What is Rust?"));
    }

    #[test]
    fn test_bytes_to_text_strips_bom() {
        assert_eq!(bytes_to_text(b"\xef\xbb\xbfhello"), "hello");
    }
}
