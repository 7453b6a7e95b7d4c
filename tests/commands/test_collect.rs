//! Cache-aware collection runs and their export

use std::time::Duration;

use member_collector::cache::ResultCache;
use member_collector::commands::collect::{build_request, collect_cached, outcome_label};
use member_collector::export::{self, ExportFormat};
use member_collector::{Collector, ErrorKind, Method};
use tempfile::tempdir;

use crate::common::{channel, fast_settings, member, post, ScriptedSource};

fn populated_source() -> ScriptedSource {
    let mut source = ScriptedSource::default();
    source.entities.insert("news".into(), channel(1, "News"));
    source.members = vec![member(1, Some("one")), member(2, None)];
    source
        .history
        .insert(1, vec![post(9, Some(2), true), post(8, Some(3), true)]);
    source
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let dir = tempdir().unwrap();
    let cache = ResultCache::new(dir.path().join("cache.json"), Duration::from_secs(600), true);
    let collector = Collector::new(populated_source(), fast_settings());
    let request = build_request("news", None, Method::ALL.to_vec(), 100).unwrap();

    let first = collect_cached(&collector, &cache, &request).await.unwrap();
    let resolves_after_first = collector.source().calls("resolve").len();
    let second = collect_cached(&collector, &cache, &request).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.result.members, second.result.members);
    assert_eq!(collector.source().calls("resolve").len(), resolves_after_first);
}

#[tokio::test]
async fn disabled_cache_always_collects() {
    let dir = tempdir().unwrap();
    let cache = ResultCache::new(dir.path().join("cache.json"), Duration::from_secs(600), false);
    let collector = Collector::new(populated_source(), fast_settings());
    let request = build_request("news", None, vec![Method::Participants], 100).unwrap();

    collect_cached(&collector, &cache, &request).await.unwrap();
    let again = collect_cached(&collector, &cache, &request).await.unwrap();

    assert!(!again.from_cache);
    assert_eq!(collector.source().calls("resolve").len(), 2);
}

#[tokio::test]
async fn export_lists_each_member_once() {
    let dir = tempdir().unwrap();
    let cache = ResultCache::new(dir.path().join("cache.json"), Duration::from_secs(600), false);
    let collector = Collector::new(populated_source(), fast_settings());
    let request = build_request("t.me/news", None, Method::ALL.to_vec(), 100).unwrap();

    let collected = collect_cached(&collector, &cache, &request).await.unwrap();
    let files = export::export(&collected.result, ExportFormat::Txt, dir.path(), "out").unwrap();
    let text = std::fs::read_to_string(&files[0]).unwrap();
    let handles: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();

    assert_eq!(handles, vec!["@one", "id_2", "id_3"]);
    assert_eq!(collected.result.stats.count(Method::Participants), 2);
    assert_eq!(collected.result.stats.count(Method::Messages), 1);
}

#[tokio::test]
async fn private_channel_failure_is_classified() {
    let dir = tempdir().unwrap();
    let cache = ResultCache::new(dir.path().join("cache.json"), Duration::from_secs(600), true);
    let mut source = ScriptedSource::default();
    source.private = vec!["closed".into(), "@closed".into()];
    let collector = Collector::new(source, fast_settings());
    let request = build_request("@closed", None, vec![Method::Messages], 10).unwrap();

    let outcome = collect_cached(&collector, &cache, &request).await;
    assert_eq!(outcome_label(&outcome), "private");
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Private);
    assert!(err.user_message().contains("invite link"));
    assert!(cache.get(&request.cache_key()).unwrap().is_none());
}
