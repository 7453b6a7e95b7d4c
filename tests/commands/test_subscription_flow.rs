//! A user's path through the subscription store

use chrono::{Duration, TimeZone, Utc};
use member_collector::commands::admin::{access_text, user_stats_text};
use member_collector::subscription::{Access, JobStatus, SubscriptionStore};
use tempfile::tempdir;

#[test]
fn trial_then_expiry_then_paid_plan() {
    let dir = tempdir().unwrap();
    let store = SubscriptionStore::open(dir.path().join("store.json")).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    store.ensure_user(100, Some("reader"), "Reader", start).unwrap();
    assert!(store.check_access(100, false, start).unwrap().is_granted());

    let later = start + Duration::days(5);
    let access = store.check_access(100, false, later).unwrap();
    assert_eq!(access, Access::Expired { days_ago: 2 });
    assert!(access_text(&access, false).contains("expired"));

    store.grant(100, "monthly", later).unwrap();
    assert_eq!(
        store.check_access(100, false, later).unwrap(),
        Access::Active { days_left: 30 }
    );

    let job = store
        .record_job(100, "@news", &["participants".into()], later)
        .unwrap();
    store
        .finish_job(job, Ok((42, Some("parsed_news.txt".into()))), later)
        .unwrap();
    assert_eq!(store.job(job).unwrap().unwrap().status, JobStatus::Completed);
    assert!(user_stats_text(&store.user_stats(100).unwrap()).contains("Members collected: 42"));

    let stats = store.stats(later).unwrap();
    assert_eq!(stats.users, 1);
    assert_eq!(stats.revenue, 800.0);
}
