//! Browser-automation capability — the seam between resolvers and whatever
//! renders a saved email.
//!
//! Resolvers only need four operations: render an HTML file, locate an element
//! by CSS selector, read an attribute, and click. Keeping that contract behind
//! trait objects lets tests drive resolvers with in-memory fakes and lets
//! deployments swap in a WebDriver-backed implementation without touching the
//! dispatch code. Handles release their underlying session when dropped, on
//! every exit path.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ResolveError;

/// Renders saved HTML into a queryable page.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn render(&self, html_path: &Path) -> Result<Box<dyn Page>, ResolveError>;
}

/// A rendered document handle.
#[async_trait]
pub trait Page: Send + Sync {
    /// Locate the first element matching a CSS selector.
    async fn locate(&self, selector: &str) -> Result<Box<dyn Element>, ResolveError>;
}

/// A located element handle.
#[async_trait]
pub trait Element: Send + Sync {
    /// Read an attribute value, if present.
    async fn attribute(&self, name: &str) -> Result<Option<String>, ResolveError>;

    /// Click the element, triggering whatever navigation or download the
    /// underlying browser performs.
    async fn click(&self) -> Result<(), ResolveError>;
}

impl std::fmt::Debug for dyn Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Element")
    }
}

/// Static HTML renderer backed by `scraper`.
///
/// Supports element location and attribute reads — enough for resolvers that
/// extract a link and fetch it themselves. `click` is unsupported: driving
/// navigation and downloads needs a real browser process, so deployments that
/// rely on click-triggered downloads must inject a WebDriver-backed `Browser`.
pub struct StaticBrowser;

impl StaticBrowser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StaticBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Browser for StaticBrowser {
    async fn render(&self, html_path: &Path) -> Result<Box<dyn Page>, ResolveError> {
        let html = tokio::fs::read_to_string(html_path).await?;
        debug!(path = %html_path.display(), bytes = html.len(), "Rendered static page");
        Ok(Box::new(StaticPage { html }))
    }
}

/// Page handle holding the raw HTML; parsed per-locate because `scraper::Html`
/// is not `Send` and must not cross an await point.
struct StaticPage {
    html: String,
}

#[async_trait]
impl Page for StaticPage {
    async fn locate(&self, selector: &str) -> Result<Box<dyn Element>, ResolveError> {
        let attributes = {
            let parsed = scraper::Selector::parse(selector)
                .map_err(|e| ResolveError::Render(format!("invalid selector {selector:?}: {e}")))?;
            let document = scraper::Html::parse_document(&self.html);
            let element = document
                .select(&parsed)
                .next()
                .ok_or_else(|| ResolveError::ElementNotFound {
                    selector: selector.to_string(),
                })?;
            element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };
        Ok(Box::new(StaticElement { attributes }))
    }
}

/// Element snapshot: attributes captured at locate time.
struct StaticElement {
    attributes: HashMap<String, String>,
}

#[async_trait]
impl Element for StaticElement {
    async fn attribute(&self, name: &str) -> Result<Option<String>, ResolveError> {
        Ok(self.attributes.get(name).cloned())
    }

    async fn click(&self) -> Result<(), ResolveError> {
        Err(ResolveError::ClickUnsupported(
            "static renderer cannot drive navigation; inject a WebDriver-backed Browser".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render_fixture(html: &str) -> Box<dyn Page> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.html");
        tokio::fs::write(&path, html).await.unwrap();
        StaticBrowser::new().render(&path).await.unwrap()
    }

    #[tokio::test]
    async fn locates_element_and_reads_attribute() {
        let page = render_fixture(
            r#"<html><body><p class="originaldocumentlink">
                 <a href="https://example.com/doc.pdf">report</a>
               </p></body></html>"#,
        )
        .await;
        let element = page.locate("p.originaldocumentlink a").await.unwrap();
        assert_eq!(
            element.attribute("href").await.unwrap().as_deref(),
            Some("https://example.com/doc.pdf")
        );
        assert_eq!(element.attribute("title").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_element_is_not_found() {
        let page = render_fixture("<html><body><p>no links here</p></body></html>").await;
        let err = page.locate("a[href]").await.unwrap_err();
        assert!(matches!(err, ResolveError::ElementNotFound { .. }));
    }

    #[tokio::test]
    async fn case_insensitive_attribute_selector() {
        let page = render_fixture(r#"<a href="https://x.com/REPORT.PDF">r</a>"#).await;
        let element = page.locate(r#"a[href*="pdf" i]"#).await.unwrap();
        assert!(element.attribute("href").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn click_is_unsupported() {
        let page = render_fixture(r#"<a href="https://x.com/a.pdf">r</a>"#).await;
        let element = page.locate("a").await.unwrap();
        assert!(matches!(
            element.click().await.unwrap_err(),
            ResolveError::ClickUnsupported(_)
        ));
    }
}
