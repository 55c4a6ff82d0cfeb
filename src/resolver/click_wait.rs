//! Pattern A — click a link in the rendered email and wait for the browser to
//! drop a new PDF into the target folder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::browser::Browser;
use crate::error::ResolveError;
use crate::resolver::Resolver;

/// Click-and-wait resolver: renders the email, clicks a bank-specific link,
/// then polls the folder for a `.pdf` that wasn't there before the click.
pub struct ClickWaitResolver {
    browser: Arc<dyn Browser>,
    selector: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ClickWaitResolver {
    pub fn new(
        browser: Arc<dyn Browser>,
        selector: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            browser,
            selector: selector.into(),
            poll_interval,
            timeout,
        }
    }

    /// Goldman Sachs: click the first link whose href contains "pdf",
    /// case-insensitively.
    pub fn goldman(browser: Arc<dyn Browser>, poll_interval: Duration, timeout: Duration) -> Self {
        Self::new(browser, r#"a[href*="pdf" i]"#, poll_interval, timeout)
    }

    /// Poll `folder` until a `.pdf` not in `before` appears, or time runs out.
    async fn wait_for_new_pdf(
        &self,
        folder: &Path,
        before: &HashSet<String>,
    ) -> Result<PathBuf, ResolveError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let now = snapshot_pdfs(folder).await?;
            if let Some(new) = now.difference(before).next() {
                debug!(file = %new, "New PDF appeared");
                return Ok(folder.join(new));
            }
            if Instant::now() >= deadline {
                return Err(ResolveError::Timeout {
                    folder: folder.to_path_buf(),
                    waited: self.timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Names of the `.pdf` files currently in `folder` (case-insensitive match).
async fn snapshot_pdfs(folder: &Path) -> Result<HashSet<String>, ResolveError> {
    let mut names = HashSet::new();
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.to_lowercase().ends_with(".pdf") {
            names.insert(name);
        }
    }
    Ok(names)
}

#[async_trait]
impl Resolver for ClickWaitResolver {
    async fn resolve(
        &self,
        html_path: &Path,
        target_folder: &Path,
    ) -> Result<PathBuf, ResolveError> {
        tokio::fs::create_dir_all(target_folder).await?;
        let before = snapshot_pdfs(target_folder).await?;

        // Scope the browser handles so the session is released before the
        // potentially long wait, on error paths included.
        {
            let page = self.browser.render(html_path).await?;
            let link = page.locate(&self.selector).await?;
            link.click().await?;
        }

        self.wait_for_new_pdf(target_folder, &before).await
    }
}
