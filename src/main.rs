use std::sync::Arc;

use report_harvester::browser::{Browser, StaticBrowser};
use report_harvester::config::Config;
use report_harvester::error::ResolveError;
use report_harvester::pipeline::Dispatcher;
use report_harvester::resolver;
use report_harvester::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> Result<(), report_harvester::error::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    eprintln!("report-harvester v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Downloads: {}", config.download_root.display());

    // A failed store open is the only fatal error — everything per-item is
    // caught, binned, and the run continues.
    let store: Arc<dyn Store> = Arc::new(LibSqlStore::new_local(&config.db_path).await?);

    let client = reqwest::Client::builder()
        .user_agent(concat!("report-harvester/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(config.http_timeout)
        .build()
        .map_err(ResolveError::Transport)?;

    let browser: Arc<dyn Browser> = Arc::new(StaticBrowser::new());
    let resolvers = resolver::production_set(browser, client, &config);

    let dispatcher = Dispatcher::new(
        store,
        resolvers,
        config.download_root.clone(),
        config.max_attempts,
        config.lock_ttl,
    );

    let summary = dispatcher.run().await?;
    eprintln!(
        "Done: {} saved, {} binned, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    Ok(())
}
