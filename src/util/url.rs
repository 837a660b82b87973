use thiserror::Error;
use url::Url;

/// Errors from normalizing a user-supplied feed address.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The address is empty after trimming.
    #[error("Feed URL is empty")]
    Empty,
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
}

/// Turns what a user typed into an absolute feed URL.
///
/// An address without a scheme is given `https://`. Only `http` and `https`
/// are accepted.
///
/// ```
/// use newsroll::util::normalize_feed_url;
///
/// let url = normalize_feed_url("example.com/feed.xml").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(normalize_feed_url("ftp://example.com/feed").is_err());
/// ```
pub fn normalize_feed_url(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url = if trimmed.contains("://") {
        Url::parse(trimmed)?
    } else {
        Url::parse(&format!("https://{}", trimmed.trim_start_matches('/')))?
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::InvalidUrl(url::ParseError::EmptyHost));
    }

    Ok(url)
}

/// Resolves a possibly relative `href` against `base`.
///
/// Returns `None` when the result is unparseable or not http(s).
pub fn resolve_url(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_https() {
        assert_eq!(
            normalize_feed_url("  blog.example.com/rss ").unwrap().as_str(),
            "https://blog.example.com/rss"
        );
        assert_eq!(
            normalize_feed_url("http://example.com/atom.xml").unwrap().as_str(),
            "http://example.com/atom.xml"
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(normalize_feed_url("   "), Err(UrlError::Empty)));
        assert!(matches!(
            normalize_feed_url("file:///etc/passwd"),
            Err(UrlError::UnsupportedScheme(_))
        ));
        assert!(normalize_feed_url("https://exa mple.com").is_err());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = "https://example.com/blog/feed.xml";
        assert_eq!(
            resolve_url("posts/1", base).as_deref(),
            Some("https://example.com/blog/posts/1")
        );
        assert_eq!(
            resolve_url("/about", base).as_deref(),
            Some("https://example.com/about")
        );
        assert_eq!(
            resolve_url("https://other.org/x", base).as_deref(),
            Some("https://other.org/x")
        );
    }

    #[test]
    fn test_resolve_rejects_non_http() {
        let base = "https://example.com/";
        assert_eq!(resolve_url("javascript:alert(1)", base), None);
        assert_eq!(resolve_url("mailto:me@example.com", base), None);
        assert_eq!(resolve_url("", base), None);
        assert_eq!(resolve_url("relative", "not a url"), None);
    }
}
