//! Resolver set — per-bank strategies for turning a saved email into a
//! downloaded PDF.
//!
//! Each bank's research mails embed their download differently, so each gets
//! its own resolver. The two shipped strategies:
//! - [`ClickWaitResolver`] — click a link in a rendered page and poll the
//!   target folder for the file the browser drops (Goldman Sachs).
//! - [`LinkFetchResolver`] — extract and unwrap a direct link, then fetch it
//!   over HTTP (JPMorgan).
//!
//! Resolvers are registered in a [`ResolverSet`] keyed by bank tag; banks
//! without a registered resolver are skipped by the dispatcher, silently.

pub mod click_wait;
pub mod link_fetch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::Browser;
use crate::config::Config;
use crate::error::ResolveError;

pub use click_wait::ClickWaitResolver;
pub use link_fetch::LinkFetchResolver;

/// A bank-specific resolve+download strategy.
///
/// Returns the path of the freshly downloaded file inside `target_folder`;
/// the dispatcher renames it to its canonical name afterwards.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        html_path: &Path,
        target_folder: &Path,
    ) -> Result<PathBuf, ResolveError>;
}

/// Ordered dispatch table from bank tag to resolver.
///
/// Registration order is preserved and drives the dispatcher's bank iteration
/// order. Built explicitly at startup — no dynamic lookup.
#[derive(Default)]
pub struct ResolverSet {
    entries: Vec<(String, Arc<dyn Resolver>)>,
}

impl ResolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for a bank tag. Last registration for a tag wins
    /// on lookup order ties; registering the same tag twice is a config bug.
    pub fn register(&mut self, bank_tag: impl Into<String>, resolver: Arc<dyn Resolver>) {
        self.entries.push((bank_tag.into(), resolver));
    }

    /// Look up the resolver for a bank tag.
    pub fn get(&self, bank_tag: &str) -> Option<&Arc<dyn Resolver>> {
        self.entries
            .iter()
            .find(|(tag, _)| tag == bank_tag)
            .map(|(_, r)| r)
    }

    /// Registered bank tags, in registration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(tag, _)| tag.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The production dispatch table: JPM then GS.
pub fn production_set(
    browser: Arc<dyn Browser>,
    client: reqwest::Client,
    config: &Config,
) -> ResolverSet {
    let mut set = ResolverSet::new();
    set.register(
        "JPM",
        Arc::new(LinkFetchResolver::jpmorgan(Arc::clone(&browser), client)),
    );
    set.register(
        "GS",
        Arc::new(ClickWaitResolver::goldman(
            browser,
            config.poll_interval,
            config.download_timeout,
        )),
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopResolver;

    #[async_trait]
    impl Resolver for NoopResolver {
        async fn resolve(
            &self,
            _html_path: &Path,
            target_folder: &Path,
        ) -> Result<PathBuf, ResolveError> {
            Ok(target_folder.join("noop.pdf"))
        }
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut set = ResolverSet::new();
        set.register("JPM", Arc::new(NoopResolver));
        set.register("GS", Arc::new(NoopResolver));
        let tags: Vec<&str> = set.tags().collect();
        assert_eq!(tags, vec!["JPM", "GS"]);
    }

    #[test]
    fn unregistered_tag_is_absent() {
        let mut set = ResolverSet::new();
        set.register("JPM", Arc::new(NoopResolver));
        assert!(set.get("JPM").is_some());
        assert!(set.get("HSBC").is_none());
    }
}
