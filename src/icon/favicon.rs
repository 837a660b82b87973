use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::cache::FetchCache;
use crate::net::Network;
use crate::util::icon_links;

/// Favicon discovery collaborator.
#[async_trait]
pub trait FaviconFinder: Send + Sync {
    /// Candidate icon URLs for a website, best first. Never fails; an
    /// unreachable site yields whatever can be guessed without it.
    async fn find(&self, site: &Url) -> Vec<Url>;
}

/// Scans the site's HTML for `<link rel="icon">`-style declarations, then
/// falls back to `/favicon.ico` at the site root.
pub struct HtmlFaviconFinder {
    network: Arc<dyn Network>,
    cache: Arc<FetchCache>,
}

impl HtmlFaviconFinder {
    pub fn new(network: Arc<dyn Network>, cache: Arc<FetchCache>) -> Self {
        Self { network, cache }
    }
}

fn root_favicon(site: &Url) -> Option<Url> {
    site.join("/favicon.ico").ok()
}

#[async_trait]
impl FaviconFinder for HtmlFaviconFinder {
    async fn find(&self, site: &Url) -> Vec<Url> {
        let mut candidates: Vec<Url> = match self.cache.get_or_fetch(&*self.network, site).await {
            Ok(body) => {
                let html = String::from_utf8_lossy(&body);
                icon_links(&html, site.as_str())
                    .into_iter()
                    .filter_map(|href| Url::parse(&href).ok())
                    .collect()
            }
            Err(e) => {
                tracing::debug!(site = %site, error = %e, "Site page unavailable for favicon scan");
                Vec::new()
            }
        };

        if let Some(fallback) = root_favicon(site) {
            if !candidates.contains(&fallback) {
                candidates.push(fallback);
            }
        }
        candidates
    }
}
