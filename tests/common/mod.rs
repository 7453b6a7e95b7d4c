//! Scripted in-memory member source shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use member_collector::collector::{ChannelInfo, ChatKind, MessageRecord};
use member_collector::{CollectorSettings, Error, Member, MemberSource, ResolveStep, Result};

pub fn member(id: i64, username: Option<&str>) -> Member {
    Member {
        username: username.map(str::to_string),
        first_name: format!("User{}", id),
        ..Member::new(id)
    }
}

pub fn channel(id: i64, title: &str) -> ChannelInfo {
    ChannelInfo {
        id,
        access_hash: Some(id + 1000),
        kind: ChatKind::Megagroup,
        title: title.to_string(),
        username: Some(title.to_lowercase()),
        participants_count: None,
    }
}

pub fn post(id: i32, author: Option<i64>, reacted: bool) -> MessageRecord {
    MessageRecord {
        id,
        author: author.map(|a| member(a, None)),
        has_reactions: reacted,
    }
}

pub fn fast_settings() -> CollectorSettings {
    CollectorSettings {
        batch_size: 3,
        request_delay: Duration::ZERO,
        ..CollectorSettings::default()
    }
}

/// Keys: plain names for `Handle`, `@name` for `AtHandle`, `+hash` for invites.
#[derive(Default)]
pub struct ScriptedSource {
    pub entities: HashMap<String, ChannelInfo>,
    pub private: Vec<String>,
    pub members: Vec<Member>,
    pub history: HashMap<i64, Vec<MessageRecord>>,
    pub linked: Option<ChannelInfo>,
    /// FLOOD_WAIT seconds returned before each successful history page
    pub history_floods: Mutex<Vec<u32>>,
    pub log: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl MemberSource for ScriptedSource {
    async fn resolve(&self, step: &ResolveStep) -> Result<ChannelInfo> {
        let key = match step {
            ResolveStep::Handle(name) | ResolveStep::AtHandle(name) => name.clone(),
            ResolveStep::InviteJoin(hash) => format!("+{}", hash),
        };
        self.record(format!("resolve {}", key));
        if self.private.contains(&key) {
            return Err(Error::from_rpc("CHANNEL_PRIVATE", 400, None));
        }
        self.entities
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::from_rpc("USERNAME_NOT_OCCUPIED", 400, None))
    }

    async fn participants_page(
        &self,
        _channel: &ChannelInfo,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Member>> {
        self.record(format!("participants {}", offset));
        Ok(self.members.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn history_page(
        &self,
        channel: &ChannelInfo,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        {
            let mut floods = self.history_floods.lock().unwrap();
            if !floods.is_empty() {
                let seconds = floods.remove(0);
                self.record(format!("flood {}", seconds));
                return Err(Error::from_rpc("FLOOD_WAIT", 420, Some(seconds)));
            }
        }
        self.record(format!("history {} {}", channel.id, offset_id));
        Ok(self
            .history
            .get(&channel.id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| offset_id == 0 || m.id < offset_id)
            .take(limit)
            .collect())
    }

    async fn linked_chat(&self, _channel: &ChannelInfo) -> Result<Option<ChannelInfo>> {
        self.record("linked".to_string());
        Ok(self.linked.clone())
    }
}
