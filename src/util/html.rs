//! Lightweight HTML scanning for the few things the engine needs from
//! markup: the first image of an article, the icon links of a website, and
//! a plain-text rendering of descriptions.
//!
//! Tags are found by string scanning rather than a full HTML parser.

use super::text::strip_control_chars;
use super::url::resolve_url;

/// Wide enough that html2text never wraps a paragraph.
const TEXT_RENDER_WIDTH: usize = 10_000;

/// Iterates over the raw text of every `<name ...>` tag in `html`.
fn tags<'a>(html: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    // ASCII lowercasing keeps byte offsets aligned with the original
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{name}");
    let mut from = 0;

    std::iter::from_fn(move || {
        while let Some(pos) = lower[from..].find(&needle) {
            let start = from + pos;
            let after = start + needle.len();
            let end = lower[start..].find('>').map(|e| start + e + 1)?;
            from = after;
            let boundary = lower[after..].chars().next();
            if matches!(boundary, Some(c) if c.is_ascii_whitespace() || c == '/' || c == '>') {
                from = end;
                return Some(&html[start..end]);
            }
        }
        None
    })
}

/// Parses `name=value` pairs out of a single tag. Names are lowercased;
/// values may be double-quoted, single-quoted or bare.
fn attributes(tag: &str) -> Vec<(String, String)> {
    let inner = tag
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('/');
    // Skip the tag name
    let mut rest = inner
        .find(|c: char| c.is_ascii_whitespace())
        .map(|i| &inner[i..])
        .unwrap_or("");
    let mut attrs = Vec::new();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let name_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (value, remaining) = match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    match body.find(q) {
                        Some(end) => (&body[..end], &body[end + 1..]),
                        None => (body, ""),
                    }
                }
                _ => {
                    let end = after_eq
                        .find(|c: char| c.is_ascii_whitespace())
                        .unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            attrs.push((name, value.to_owned()));
            rest = remaining;
        } else if !name.is_empty() {
            attrs.push((name, String::new()));
        }
    }

    attrs
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// The `src` of the first `<img>` in `html`, resolved against `base`.
///
/// Inline `data:` images are skipped.
pub fn first_image_src(html: &str, base: &str) -> Option<String> {
    tags(html, "img").find_map(|tag| {
        let attrs = attributes(tag);
        let src = attribute(&attrs, "src")?.trim();
        if src.is_empty() || src.starts_with("data:") {
            return None;
        }
        resolve_url(src, base)
    })
}

/// Icon candidates declared by `<link rel=...icon...>` tags, best first.
///
/// `apple-touch-icon` variants come before plain `icon`/`shortcut icon`
/// because they are usually larger than the 16px favicon.
pub fn icon_links(html: &str, base: &str) -> Vec<String> {
    let mut touch = Vec::new();
    let mut plain = Vec::new();

    for tag in tags(html, "link") {
        let attrs = attributes(tag);
        let Some(rel) = attribute(&attrs, "rel") else {
            continue;
        };
        let rel = rel.to_ascii_lowercase();
        let Some(href) = attribute(&attrs, "href").and_then(|h| resolve_url(h.trim(), base))
        else {
            continue;
        };

        if rel.split_whitespace().any(|r| r.starts_with("apple-touch-icon")) {
            touch.push(href);
        } else if rel.split_whitespace().any(|r| r == "icon") {
            plain.push(href);
        }
    }

    touch.extend(plain);
    touch
}

/// Renders description HTML as trimmed plain text without control characters.
pub fn html_to_text(html: &str) -> String {
    let rendered = html2text::from_read(html.as_bytes(), TEXT_RENDER_WIDTH);
    strip_control_chars(rendered.trim()).into_owned()
}
