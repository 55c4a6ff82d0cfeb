//! Pattern B — extract a direct document link from the rendered email, unwrap
//! any safe-link redirect, and stream the PDF over HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::browser::Browser;
use crate::error::ResolveError;
use crate::resolver::Resolver;

/// Fallback filename when the document URL has no usable path segment.
const DEFAULT_FILENAME: &str = "document.pdf";

/// Resolve-then-fetch resolver: locates a wrapper element, reads its link,
/// unwraps redirect/safe-link wrappers, and downloads the target directly.
pub struct LinkFetchResolver {
    browser: Arc<dyn Browser>,
    client: reqwest::Client,
    selector: String,
}

impl LinkFetchResolver {
    pub fn new(
        browser: Arc<dyn Browser>,
        client: reqwest::Client,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            browser,
            client,
            selector: selector.into(),
        }
    }

    /// JPMorgan: the anchor inside the `originaldocumentlink` wrapper.
    pub fn jpmorgan(browser: Arc<dyn Browser>, client: reqwest::Client) -> Self {
        Self::new(browser, client, "p.originaldocumentlink a")
    }

    /// Stream the document at `url` into `folder`, named from the URL path.
    async fn download(&self, url: &Url, folder: &Path) -> Result<PathBuf, ResolveError> {
        tokio::fs::create_dir_all(folder).await?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let out_path = folder.join(filename_from_url(url));
        let mut file = tokio::fs::File::create(&out_path).await?;
        let mut response = response;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(url = %url, path = %out_path.display(), "Downloaded document");
        Ok(out_path)
    }
}

/// Unwrap a safe-link/redirect wrapper: if the href carries an embedded `url`
/// query parameter (form-urlencoded), return its decoded value; otherwise the
/// raw href.
pub fn unwrap_safelink(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| href.to_string()),
        Err(_) => href.to_string(),
    }
}

/// Local filename from the URL's final path segment, or a generic default.
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string()
}

#[async_trait]
impl Resolver for LinkFetchResolver {
    async fn resolve(
        &self,
        html_path: &Path,
        target_folder: &Path,
    ) -> Result<PathBuf, ResolveError> {
        // Scope the browser handles so the session is released before the
        // download starts, on error paths included.
        let href = {
            let page = self.browser.render(html_path).await?;
            let anchor = page.locate(&self.selector).await?;
            anchor
                .attribute("href")
                .await?
                .ok_or_else(|| ResolveError::ElementNotFound {
                    selector: format!("{}[href]", self.selector),
                })?
        };

        let target = unwrap_safelink(&href);
        let url = Url::parse(&target)
            .map_err(|e| ResolveError::InvalidUrl(format!("{target}: {e}")))?;
        self.download(&url, target_folder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_embedded_url_parameter() {
        let wrapped = "https://safelinks.example.com/?url=https%3A%2F%2Fresearch.example.com%2Fdoc.pdf&data=xyz";
        assert_eq!(
            unwrap_safelink(wrapped),
            "https://research.example.com/doc.pdf"
        );
    }

    #[test]
    fn unwrap_decodes_plus_as_space() {
        let wrapped = "https://safelinks.example.com/?url=https%3A%2F%2Fx.com%2Fq1+note.pdf";
        assert_eq!(unwrap_safelink(wrapped), "https://x.com/q1 note.pdf");
    }

    #[test]
    fn plain_href_passes_through() {
        let href = "https://research.example.com/reports/weekly.pdf";
        assert_eq!(unwrap_safelink(href), href);
    }

    #[test]
    fn unparseable_href_passes_through() {
        assert_eq!(unwrap_safelink("not a url at all"), "not a url at all");
    }

    #[test]
    fn filename_from_last_path_segment() {
        let url = Url::parse("https://x.com/research/2025/weekly.pdf").unwrap();
        assert_eq!(filename_from_url(&url), "weekly.pdf");
    }

    #[test]
    fn filename_defaults_when_path_is_bare() {
        let url = Url::parse("https://x.com/").unwrap();
        assert_eq!(filename_from_url(&url), "document.pdf");
        let url = Url::parse("https://x.com").unwrap();
        assert_eq!(filename_from_url(&url), "document.pdf");
    }

    #[test]
    fn filename_ignores_query_string() {
        let url = Url::parse("https://x.com/doc.pdf?token=abc").unwrap();
        assert_eq!(filename_from_url(&url), "doc.pdf");
    }
}
