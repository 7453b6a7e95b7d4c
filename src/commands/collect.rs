//! `collect` command: one collection run from the CLI
//!
//! Also hosts the cache-aware run shared with the bot.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::collector::{CollectRequest, CollectionResult, Collector, MemberSource, Method};
use crate::config::Config;
use crate::error::{ErrorKind, Result};
use crate::export::{self, ExportFormat};
use crate::metrics;
use crate::session::{self, SessionLock};
use crate::target::ChannelTarget;
use crate::telegram::TelegramSource;

#[derive(Debug, Clone)]
pub struct CollectArgs {
    pub channel: String,
    pub invite: Option<String>,
    pub methods: Vec<Method>,
    pub limit: usize,
    pub format: ExportFormat,
    pub output_dir: Option<PathBuf>,
    pub use_cache: bool,
}

/// Outcome of a cache-aware run.
#[derive(Debug, Clone)]
pub struct Collected {
    pub result: CollectionResult,
    pub from_cache: bool,
}

/// Build the request from raw user input.
pub fn build_request(channel: &str, invite: Option<&str>, methods: Vec<Method>, limit: usize) -> Result<CollectRequest> {
    let mut target = ChannelTarget::parse(channel)?;
    if let Some(invite) = invite {
        target = target.with_invite(invite)?;
    }
    Ok(CollectRequest::new(target, methods, limit))
}

/// Serve from cache when possible, otherwise collect and store.
pub async fn collect_cached<S: MemberSource>(
    collector: &Collector<S>,
    cache: &ResultCache,
    request: &CollectRequest,
) -> Result<Collected> {
    let key = request.cache_key();
    match cache.get(&key) {
        Ok(Some(result)) => {
            info!("Serving {} from cache", request.target);
            return Ok(Collected {
                result,
                from_cache: true,
            });
        }
        Ok(None) => {}
        Err(err) => warn!("Cache read failed: {}", err),
    }

    let outcome = collector.collect(request).await;
    metrics::record_job(outcome_label(&outcome));
    let result = outcome?;

    if let Err(err) = cache.put(&key, &result) {
        warn!("Cache write failed: {}", err);
    }
    Ok(Collected {
        result,
        from_cache: false,
    })
}

/// Metrics label for a finished run.
pub fn outcome_label<T>(outcome: &Result<T>) -> &'static str {
    match outcome {
        Ok(_) => "ok",
        Err(err) => match err.kind() {
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::Private => "private",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Generic => "error",
        },
    }
}

pub async fn run(config: &Config, args: CollectArgs) -> Result<Vec<PathBuf>> {
    let request = build_request(&args.channel, args.invite.as_deref(), args.methods, args.limit)?;

    let _lock = SessionLock::acquire(config)?;
    let client = session::connect(config).await?;
    let collector = Collector::new(
        TelegramSource::new(client.client.clone()),
        config.collector.clone(),
    );
    let cache = ResultCache::new(
        &config.cache_path,
        config.cache_ttl,
        config.cache_enabled && args.use_cache,
    );

    let collected = collect_cached(&collector, &cache, &request).await?;
    let result = &collected.result;

    let dir = args.output_dir.unwrap_or_else(|| config.export_dir());
    let base = export::base_file_name(&request.target.label(), Local::now());
    let files = export::export(result, args.format, &dir, &base)?;

    println!(
        "{}",
        export::stats_summary(
            &result.stats,
            Duration::from_millis(result.stats.duration_ms)
        )
    );
    if collected.from_cache {
        println!("(served from cache)");
    }
    for file in &files {
        println!("Saved {}", file.display());
    }
    Ok(files)
}
