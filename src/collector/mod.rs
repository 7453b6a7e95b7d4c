//! Multi-strategy member collection
//!
//! A collection run resolves the target, then walks up to four strategies
//! in a fixed order:
//! - `participants`: the channel member list, paged by offset
//! - `messages`: authors found in message history
//! - `comments`: authors in the linked discussion group
//! - `reactions`: authors of messages that received reactions
//!
//! Members are de-duplicated by id across strategies; the first strategy to
//! see a member owns it.

pub mod backoff;
pub mod source;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CollectorSettings;
use crate::error::{Error, ErrorKind, Result};
use crate::metrics;
use crate::target::ChannelTarget;

pub use backoff::{FloodBackoff, FloodStats, Pacer};
pub use source::MemberSource;

/// Largest history page the API hands out.
const HISTORY_PAGE: usize = 100;

/// Collection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Participants,
    Messages,
    Comments,
    Reactions,
}

impl Method {
    /// Execution order of the engine.
    pub const ALL: [Method; 4] = [
        Method::Participants,
        Method::Messages,
        Method::Comments,
        Method::Reactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Participants => "participants",
            Method::Messages => "messages",
            Method::Comments => "comments",
            Method::Reactions => "reactions",
        }
    }

    /// Parse a comma separated list; `all` selects every strategy.
    pub fn parse_list(input: &str) -> Result<Vec<Method>> {
        let mut methods = Vec::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                return Ok(Method::ALL.to_vec());
            }
            let method = part.parse::<Method>()?;
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        if methods.is_empty() {
            return Err(Error::InvalidArgument("no collection methods given".into()));
        }
        Ok(methods)
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "participants" | "members" | "basic" => Ok(Method::Participants),
            "messages" | "history" => Ok(Method::Messages),
            "comments" => Ok(Method::Comments),
            "reactions" => Ok(Method::Reactions),
            other => Err(Error::InvalidArgument(format!(
                "unknown collection method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collected account. Phone numbers are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_bot: bool,
    pub is_deleted: bool,
    pub premium: bool,
    pub verified: bool,
    pub scam: bool,
    pub fake: bool,
    pub method: Option<Method>,
}

impl Member {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            first_name: String::new(),
            last_name: String::new(),
            is_bot: false,
            is_deleted: false,
            premium: false,
            verified: false,
            scam: false,
            fake: false,
            method: None,
        }
    }

    /// `@username` when known, `id_<id>` otherwise.
    pub fn handle(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => format!("@{}", username),
            _ => format!("id_{}", self.id),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Broadcast,
    Megagroup,
    BasicGroup,
}

/// Resolved channel or group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub access_hash: Option<i64>,
    pub kind: ChatKind,
    pub title: String,
    pub username: Option<String>,
    pub participants_count: Option<i32>,
}

/// One history entry as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i32,
    pub author: Option<Member>,
    pub has_reactions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub per_method: BTreeMap<Method, usize>,
    pub failed: Vec<Method>,
    pub requests: usize,
    pub flood_waits: u32,
    pub flood_wait_secs: u64,
    pub total: usize,
    pub unique: usize,
    pub duration_ms: u64,
}

impl CollectionStats {
    pub fn count(&self, method: Method) -> usize {
        self.per_method.get(&method).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub channel: ChannelInfo,
    pub members: Vec<Member>,
    pub stats: CollectionStats,
}

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub target: ChannelTarget,
    pub methods: Vec<Method>,
    pub limit: usize,
}

impl CollectRequest {
    pub fn new(target: ChannelTarget, methods: Vec<Method>, limit: usize) -> Self {
        Self {
            target,
            methods,
            limit,
        }
    }

    /// Cache key independent of method order.
    pub fn cache_key(&self) -> String {
        let mut names: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        names.sort_unstable();
        names.dedup();
        format!(
            "channel:{}:methods:{}:limit:{}",
            self.target.cache_key(),
            names.join(","),
            self.limit
        )
    }
}

/// Accumulates members across strategies.
#[derive(Debug, Default)]
struct MemberSink {
    seen: HashSet<i64>,
    members: Vec<Member>,
    per_method: BTreeMap<Method, usize>,
}

impl MemberSink {
    /// Keep the member if no earlier strategy produced the same id.
    fn offer(&mut self, mut member: Member, method: Method) -> bool {
        if !self.seen.insert(member.id) {
            return false;
        }
        member.method = Some(method);
        self.members.push(member);
        *self.per_method.entry(method).or_insert(0) += 1;
        true
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}

/// Which history entries a scan keeps.
#[derive(Debug, Clone, Copy)]
enum HistoryFilter {
    AnyAuthor,
    Reacted,
}

impl HistoryFilter {
    fn keeps(&self, record: &MessageRecord) -> bool {
        match self {
            HistoryFilter::AnyAuthor => true,
            HistoryFilter::Reacted => record.has_reactions,
        }
    }
}

/// Mutable state of one run.
struct Run {
    sink: MemberSink,
    flood: FloodStats,
    requests: usize,
}

/// The collection engine over any [`MemberSource`].
pub struct Collector<S> {
    source: S,
    settings: CollectorSettings,
    backoff: FloodBackoff,
    pacer: Pacer,
}

impl<S: MemberSource> Collector<S> {
    pub fn new(source: S, settings: CollectorSettings) -> Self {
        let backoff = FloodBackoff::new(settings.flood_max_retries, settings.flood_max_wait_secs);
        let pacer = Pacer::new(settings.request_delay);
        Self {
            source,
            settings,
            backoff,
            pacer,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Resolve the target and run the requested strategies.
    pub async fn collect(&self, request: &CollectRequest) -> Result<CollectionResult> {
        if request.methods.is_empty() {
            return Err(Error::InvalidArgument("no collection methods given".into()));
        }
        if request.limit == 0 {
            return Err(Error::InvalidArgument("limit must be positive".into()));
        }
        let limit = request.limit.min(self.settings.max_participants);
        let started = Instant::now();

        let mut run = Run {
            sink: MemberSink::default(),
            flood: FloodStats::default(),
            requests: 0,
        };

        let channel = self.resolve(&request.target, &mut run).await?;
        info!(
            "Resolved {} as '{}' (id {}, {:?})",
            request.target, channel.title, channel.id, channel.kind
        );

        let mut failed = Vec::new();
        for method in Method::ALL {
            if !request.methods.contains(&method) {
                continue;
            }
            if run.sink.len() >= limit {
                debug!("Limit {} reached, skipping {}", limit, method);
                continue;
            }

            let before = run.sink.len();
            info!("Collecting via {}", method);
            let outcome = match method {
                Method::Participants => self.collect_participants(&channel, limit, &mut run).await,
                Method::Messages => {
                    self.scan_history(
                        &channel,
                        self.settings.message_scan_limit,
                        HistoryFilter::AnyAuthor,
                        method,
                        &mut run,
                    )
                    .await
                }
                Method::Comments => self.collect_comments(&channel, &mut run).await,
                Method::Reactions => {
                    self.scan_history(
                        &channel,
                        self.settings.reaction_scan_limit,
                        HistoryFilter::Reacted,
                        method,
                        &mut run,
                    )
                    .await
                }
            };

            let added = run.sink.len() - before;
            metrics::record_members(method.as_str(), added);
            match outcome {
                Ok(()) => info!("{}: {} new members", method, added),
                Err(err) => {
                    error!("{} failed after {} new members: {}", method, added, err);
                    failed.push(method);
                }
            }
        }

        let unique = run.sink.seen.len();
        let mut members = run.sink.members;
        members.truncate(limit);

        let stats = CollectionStats {
            per_method: run.sink.per_method,
            failed,
            requests: run.requests,
            flood_waits: run.flood.waits,
            flood_wait_secs: run.flood.waited_secs,
            total: members.len(),
            unique,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Collection of {} finished: {} members ({} unique, {} requests)",
            request.target, stats.total, stats.unique, stats.requests
        );

        Ok(CollectionResult {
            channel,
            members,
            stats,
        })
    }

    /// Walk the resolution plan; not-found and private answers fall through
    /// to the next step, anything else aborts.
    async fn resolve(&self, target: &ChannelTarget, run: &mut Run) -> Result<ChannelInfo> {
        let mut last_err = None;
        for step in target.resolution_plan() {
            let source = &self.source;
            let step_ref = &step;
            run.requests += 1;
            match self
                .backoff
                .run(&mut run.flood, move || source.resolve(step_ref))
                .await
            {
                Ok(channel) => return Ok(channel),
                Err(err) => match err.kind() {
                    ErrorKind::NotFound | ErrorKind::Private => {
                        warn!("Resolution via {} failed: {}", step, err);
                        last_err = Some(err);
                    }
                    _ => return Err(err),
                },
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(target.to_string())))
    }

    async fn collect_participants(
        &self,
        channel: &ChannelInfo,
        limit: usize,
        run: &mut Run,
    ) -> Result<()> {
        let batch = self.settings.batch_size.max(1);
        let mut offset = 0;
        let mut pages = 0;

        while offset < limit && pages < self.settings.max_requests_per_channel {
            let source = &self.source;
            run.requests += 1;
            let page = self
                .backoff
                .run(&mut run.flood, move || {
                    source.participants_page(channel, offset, batch)
                })
                .await?;
            if page.is_empty() {
                break;
            }

            for member in page {
                run.sink.offer(member, Method::Participants);
            }
            offset += batch;
            pages += 1;

            if pages % 5 == 0 {
                debug!("Participants: {} collected so far", run.sink.len());
            }
            self.pacer.pause().await;
        }
        Ok(())
    }

    async fn collect_comments(&self, channel: &ChannelInfo, run: &mut Run) -> Result<()> {
        let source = &self.source;
        run.requests += 1;
        let linked = self
            .backoff
            .run(&mut run.flood, move || source.linked_chat(channel))
            .await?;

        match linked {
            Some(discussion) => {
                info!("Scanning linked discussion '{}'", discussion.title);
                self.scan_history(
                    &discussion,
                    self.settings.comment_scan_limit,
                    HistoryFilter::AnyAuthor,
                    Method::Comments,
                    run,
                )
                .await
            }
            None => {
                info!("No linked discussion group, comments skipped");
                Ok(())
            }
        }
    }

    /// Page backwards through history, newest first, up to `scan_limit` messages.
    async fn scan_history(
        &self,
        channel: &ChannelInfo,
        scan_limit: usize,
        filter: HistoryFilter,
        method: Method,
        run: &mut Run,
    ) -> Result<()> {
        let mut scanned = 0;
        let mut offset_id = 0;

        while scanned < scan_limit {
            let page_size = (scan_limit - scanned).min(HISTORY_PAGE);
            let source = &self.source;
            run.requests += 1;
            let page = self
                .backoff
                .run(&mut run.flood, move || {
                    source.history_page(channel, offset_id, page_size)
                })
                .await?;
            if page.is_empty() {
                break;
            }

            let oldest = page.iter().map(|m| m.id).min().unwrap_or(0);
            scanned += page.len();
            for record in page {
                if !filter.keeps(&record) {
                    continue;
                }
                if let Some(author) = record.author {
                    run.sink.offer(author, method);
                }
            }

            if oldest <= 1 || oldest == offset_id {
                break;
            }
            offset_id = oldest;
            self.pacer.pause().await;
        }
        debug!("{}: scanned {} messages", method, scanned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ResolveStep;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    fn member(id: i64, username: Option<&str>) -> Member {
        Member {
            username: username.map(str::to_string),
            first_name: format!("User{}", id),
            ..Member::new(id)
        }
    }

    fn channel(id: i64, kind: ChatKind) -> ChannelInfo {
        ChannelInfo {
            id,
            access_hash: Some(id * 10),
            kind,
            title: format!("chat {}", id),
            username: None,
            participants_count: None,
        }
    }

    fn record(id: i32, author: Option<i64>, reacted: bool) -> MessageRecord {
        MessageRecord {
            id,
            author: author.map(|a| member(a, None)),
            has_reactions: reacted,
        }
    }

    /// In-memory provider with scripted failures.
    #[derive(Default)]
    struct FakeSource {
        resolvable: HashMap<String, ChannelInfo>,
        private_handles: Vec<String>,
        participants: Vec<Member>,
        history: HashMap<i64, Vec<MessageRecord>>,
        linked: Option<ChannelInfo>,
        participants_error: Option<fn() -> Error>,
        flood_on_first_page: Mutex<u32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn log(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MemberSource for FakeSource {
        async fn resolve(&self, step: &ResolveStep) -> Result<ChannelInfo> {
            self.log(format!("resolve {:?}", step));
            let key = match step {
                ResolveStep::Handle(name) | ResolveStep::AtHandle(name) => name.clone(),
                ResolveStep::InviteJoin(hash) => format!("+{}", hash),
            };
            if self.private_handles.contains(&key) {
                return Err(Error::ChannelPrivate("CHANNEL_PRIVATE".into()));
            }
            self.resolvable
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::NotFound("USERNAME_NOT_OCCUPIED".into()))
        }

        async fn participants_page(
            &self,
            _channel: &ChannelInfo,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<Member>> {
            self.log(format!("participants {} {}", offset, limit));
            if let Some(make_err) = self.participants_error {
                return Err(make_err());
            }
            {
                let mut floods = self.flood_on_first_page.lock().unwrap();
                if offset == 0 && *floods > 0 {
                    *floods -= 1;
                    return Err(Error::FloodWait(2));
                }
            }
            Ok(self
                .participants
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn history_page(
            &self,
            channel: &ChannelInfo,
            offset_id: i32,
            limit: usize,
        ) -> Result<Vec<MessageRecord>> {
            self.log(format!("history {} {} {}", channel.id, offset_id, limit));
            let records = self.history.get(&channel.id).cloned().unwrap_or_default();
            Ok(records
                .into_iter()
                .filter(|r| offset_id == 0 || r.id < offset_id)
                .take(limit)
                .collect())
        }

        async fn linked_chat(&self, _channel: &ChannelInfo) -> Result<Option<ChannelInfo>> {
            self.log("linked".to_string());
            Ok(self.linked.clone())
        }
    }

    fn settings() -> CollectorSettings {
        CollectorSettings {
            batch_size: 2,
            request_delay: Duration::ZERO,
            ..CollectorSettings::default()
        }
    }

    fn public_source() -> FakeSource {
        let mut source = FakeSource::default();
        source
            .resolvable
            .insert("chan".into(), channel(1, ChatKind::Megagroup));
        source
    }

    fn request(methods: Vec<Method>, limit: usize) -> CollectRequest {
        CollectRequest::new(ChannelTarget::Public("chan".into()), methods, limit)
    }

    #[test]
    fn method_list_parsing() {
        assert_eq!(
            Method::parse_list("messages, participants,messages").unwrap(),
            vec![Method::Messages, Method::Participants]
        );
        assert_eq!(Method::parse_list("all").unwrap(), Method::ALL.to_vec());
        assert!(Method::parse_list("").is_err());
        assert!(Method::parse_list("likes").is_err());
    }

    #[test]
    fn cache_key_ignores_method_order() {
        let a = request(vec![Method::Reactions, Method::Messages], 10);
        let b = request(vec![Method::Messages, Method::Reactions], 10);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "channel:chan:methods:messages,reactions:limit:10");
    }

    #[test]
    fn member_handle_falls_back_to_id() {
        assert_eq!(member(5, Some("bob")).handle(), "@bob");
        assert_eq!(member(5, None).handle(), "id_5");
        assert_eq!(member(5, Some("")).handle(), "id_5");
    }

    #[tokio::test]
    async fn deduplicates_across_strategies_first_owner_wins() {
        let mut source = public_source();
        source.participants = vec![member(1, Some("a")), member(2, None)];
        source.history.insert(
            1,
            vec![
                record(30, Some(2), true),
                record(29, Some(3), false),
                record(28, Some(4), true),
                record(27, None, true),
            ],
        );
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(Method::ALL.to_vec(), 100))
            .await
            .unwrap();

        let ids: Vec<i64> = result.members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(result.members[1].method, Some(Method::Participants));
        assert_eq!(result.members[2].method, Some(Method::Messages));
        assert_eq!(result.stats.count(Method::Participants), 2);
        assert_eq!(result.stats.count(Method::Messages), 2);
        assert_eq!(result.stats.count(Method::Reactions), 0);
        assert_eq!(result.stats.unique, 4);
        assert_eq!(result.stats.total, 4);
    }

    #[tokio::test]
    async fn strategies_run_in_fixed_order() {
        let mut source = public_source();
        source.participants = vec![member(1, None)];
        source.history.insert(1, vec![record(5, Some(9), true)]);
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Reactions, Method::Participants], 100))
            .await
            .unwrap();

        let calls = collector.source().calls();
        let first_participants = calls.iter().position(|c| c.starts_with("participants"));
        let first_history = calls.iter().position(|c| c.starts_with("history"));
        assert!(first_participants < first_history);
        assert_eq!(result.members[1].method, Some(Method::Reactions));
    }

    #[tokio::test]
    async fn participants_pages_until_empty() {
        let mut source = public_source();
        source.participants = (1..=5).map(|i| member(i, None)).collect();
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Participants], 100))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 5);
        let pages: Vec<String> = collector
            .source()
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("participants"))
            .collect();
        assert_eq!(
            pages,
            vec![
                "participants 0 2",
                "participants 2 2",
                "participants 4 2",
                "participants 6 2"
            ]
        );
    }

    #[tokio::test]
    async fn participants_respect_request_cap() {
        let mut source = public_source();
        source.participants = (1..=100).map(|i| member(i, None)).collect();
        let collector = Collector::new(
            source,
            CollectorSettings {
                max_requests_per_channel: 3,
                ..settings()
            },
        );

        let result = collector
            .collect(&request(vec![Method::Participants], 100))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 6);
    }

    #[tokio::test]
    async fn result_is_truncated_to_limit() {
        let mut source = public_source();
        source.participants = (1..=5).map(|i| member(i, None)).collect();
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Participants, Method::Messages], 3))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 3);
        assert_eq!(result.stats.total, 3);
        assert_eq!(result.stats.unique, 4);
        assert!(!collector
            .source()
            .calls()
            .iter()
            .any(|c| c.starts_with("history")));
    }

    #[tokio::test]
    async fn limit_is_capped_by_settings() {
        let mut source = public_source();
        source.participants = (1..=10).map(|i| member(i, None)).collect();
        let collector = Collector::new(
            source,
            CollectorSettings {
                max_participants: 4,
                ..settings()
            },
        );

        let result = collector
            .collect(&request(vec![Method::Participants], 1000))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 4);
    }

    #[tokio::test]
    async fn empty_channel_yields_empty_result() {
        let collector = Collector::new(public_source(), settings());

        let result = collector
            .collect(&request(Method::ALL.to_vec(), 100))
            .await
            .unwrap();

        assert!(result.members.is_empty());
        assert_eq!(result.stats.total, 0);
        assert_eq!(result.stats.unique, 0);
        assert!(result.stats.failed.is_empty());
    }

    #[tokio::test]
    async fn single_member_channel() {
        let mut source = public_source();
        source.participants = vec![member(42, Some("solo"))];
        source.history.insert(1, vec![record(1, Some(42), true)]);
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(Method::ALL.to_vec(), 100))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 1);
        assert_eq!(result.members[0].handle(), "@solo");
        assert_eq!(result.stats.unique, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_is_retried_inside_strategy() {
        let mut source = public_source();
        source.participants = vec![member(1, None), member(2, None)];
        *source.flood_on_first_page.lock().unwrap() = 2;
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Participants], 100))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 2);
        assert_eq!(result.stats.flood_waits, 2);
        assert_eq!(result.stats.flood_wait_secs, 6);
        assert!(result.stats.failed.is_empty());
    }

    #[tokio::test]
    async fn failing_strategy_does_not_stop_others() {
        fn admin_required() -> Error {
            Error::ChannelPrivate("CHAT_ADMIN_REQUIRED".into())
        }
        let mut source = public_source();
        source.participants_error = Some(admin_required as fn() -> Error);
        source.history.insert(1, vec![record(3, Some(7), false)]);
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Participants, Method::Messages], 100))
            .await
            .unwrap();

        assert_eq!(result.stats.failed, vec![Method::Participants]);
        assert_eq!(result.members.len(), 1);
        assert_eq!(result.members[0].method, Some(Method::Messages));
    }

    #[tokio::test]
    async fn comments_scan_linked_discussion() {
        let mut source = public_source();
        source.linked = Some(channel(2, ChatKind::Megagroup));
        source.history.insert(1, vec![record(10, Some(1), false)]);
        source
            .history
            .insert(2, vec![record(50, Some(8), false), record(49, Some(9), false)]);
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Comments], 100))
            .await
            .unwrap();

        let ids: Vec<i64> = result.members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![8, 9]);
        assert_eq!(result.stats.count(Method::Comments), 2);
    }

    #[tokio::test]
    async fn comments_without_linked_chat_contribute_nothing() {
        let mut source = public_source();
        source.history.insert(1, vec![record(10, Some(1), false)]);
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Comments], 100))
            .await
            .unwrap();

        assert!(result.members.is_empty());
        assert!(result.stats.failed.is_empty());
    }

    #[tokio::test]
    async fn history_scan_stops_at_scan_limit() {
        let mut source = public_source();
        source.history.insert(
            1,
            (1..=300).rev().map(|id| record(id, Some(id as i64), false)).collect(),
        );
        let collector = Collector::new(
            source,
            CollectorSettings {
                message_scan_limit: 150,
                ..settings()
            },
        );

        let result = collector
            .collect(&request(vec![Method::Messages], 1000))
            .await
            .unwrap();

        assert_eq!(result.members.len(), 150);
        let pages: Vec<String> = collector
            .source()
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("history"))
            .collect();
        assert_eq!(pages, vec!["history 1 0 100", "history 1 201 50"]);
    }

    #[tokio::test]
    async fn resolution_falls_back_to_at_handle() {
        let mut source = FakeSource::default();
        source
            .resolvable
            .insert("@chan".into(), channel(1, ChatKind::Broadcast));
        let collector = Collector::new(source, settings());

        let result = collector
            .collect(&request(vec![Method::Messages], 10))
            .await
            .unwrap();

        assert_eq!(result.channel.id, 1);
        let resolves: Vec<String> = collector
            .source()
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("resolve"))
            .collect();
        assert_eq!(
            resolves,
            vec![
                "resolve Handle(\"chan\")",
                "resolve AtHandle(\"@chan\")"
            ]
        );
    }

    #[tokio::test]
    async fn private_group_falls_back_to_invite_join() {
        let mut source = FakeSource::default();
        source.private_handles = vec!["secret".into(), "@secret".into()];
        source
            .resolvable
            .insert("+HASH".into(), channel(3, ChatKind::Megagroup));
        let collector = Collector::new(source, settings());
        let target = ChannelTarget::Public("secret".into())
            .with_invite("t.me/+HASH")
            .unwrap();

        let result = collector
            .collect(&CollectRequest::new(target, vec![Method::Messages], 10))
            .await
            .unwrap();

        assert_eq!(result.channel.id, 3);
        let resolves: Vec<String> = collector
            .source()
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("resolve"))
            .collect();
        assert_eq!(resolves.len(), 3);
        assert!(resolves[2].contains("InviteJoin"));
    }

    #[tokio::test]
    async fn unresolvable_target_reports_last_error() {
        let mut source = FakeSource::default();
        source.private_handles = vec!["@secret".into()];
        let collector = Collector::new(source, settings());

        let err = collector
            .collect(&CollectRequest::new(
                ChannelTarget::Public("secret".into()),
                vec![Method::Messages],
                10,
            ))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Private);
    }

    #[tokio::test]
    async fn missing_target_is_not_found() {
        let collector = Collector::new(FakeSource::default(), settings());

        let err = collector
            .collect(&request(vec![Method::Messages], 10))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejects_empty_methods_and_zero_limit() {
        let collector = Collector::new(public_source(), settings());
        assert!(matches!(
            collector.collect(&request(vec![], 10)).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            collector.collect(&request(vec![Method::Messages], 0)).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
