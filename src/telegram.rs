//! MTProto implementation of [`MemberSource`]
//!
//! Every method maps to a single raw request so the collection engine keeps
//! control of pacing and flood handling.

use async_trait::async_trait;
use grammers_client::types::peer::Peer;
use grammers_client::{Client, InvocationError};
use grammers_tl_types as tl;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::collector::{ChannelInfo, ChatKind, Member, MemberSource, MessageRecord};
use crate::error::{Error, Result};
use crate::target::ResolveStep;

/// Max results of a global search used by the `@handle` fallback.
const SEARCH_LIMIT: i32 = 20;

pub struct TelegramSource {
    client: Client,
}

impl TelegramSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn resolve_handle(&self, name: &str) -> Result<ChannelInfo> {
        let peer = self
            .client
            .resolve_username(name)
            .await?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        channel_from_peer(&peer).ok_or_else(|| Error::NotFound(format!("{} is not a chat", name)))
    }

    /// Global search for the username; catches handles the resolver misses.
    async fn search_handle(&self, at_name: &str) -> Result<ChannelInfo> {
        let wanted = at_name.trim_start_matches('@');
        let found = self
            .client
            .invoke(&tl::functions::contacts::Search {
                q: at_name.to_string(),
                limit: SEARCH_LIMIT,
            })
            .await?;
        let tl::enums::contacts::Found::Found(found) = found;
        found
            .chats
            .iter()
            .filter_map(channel_from_chat)
            .find(|c| {
                c.username
                    .as_deref()
                    .is_some_and(|u| u.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| Error::NotFound(at_name.to_string()))
    }

    async fn join_invite(&self, hash: &str) -> Result<ChannelInfo> {
        let joined = self
            .client
            .invoke(&tl::functions::messages::ImportChatInvite {
                hash: hash.to_string(),
            })
            .await;

        match joined {
            Ok(updates) => {
                info!("Joined chat via invite +{}", hash);
                chat_from_updates(&updates)
                    .ok_or_else(|| Error::NotFound(format!("invite +{} returned no chat", hash)))
            }
            Err(InvocationError::Rpc(rpc)) if rpc.name == "USER_ALREADY_PARTICIPANT" => {
                debug!("Already a member of +{}", hash);
                self.check_invite(hash).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn check_invite(&self, hash: &str) -> Result<ChannelInfo> {
        let invite = self
            .client
            .invoke(&tl::functions::messages::CheckChatInvite {
                hash: hash.to_string(),
            })
            .await?;
        let chat = match invite {
            tl::enums::ChatInvite::Already(already) => Some(already.chat),
            tl::enums::ChatInvite::Peek(peek) => Some(peek.chat),
            tl::enums::ChatInvite::Invite(_) => None,
        };
        chat.as_ref()
            .and_then(channel_from_chat)
            .ok_or_else(|| Error::ChannelPrivate(format!("invite +{} needs approval", hash)))
    }

    /// Basic groups have no paginated member list; the full chat carries all of it.
    async fn basic_group_members(&self, chat_id: i64) -> Result<Vec<Member>> {
        let tl::enums::messages::ChatFull::Full(full) = self
            .client
            .invoke(&tl::functions::messages::GetFullChat { chat_id })
            .await?;

        let ids: Vec<i64> = match full.full_chat {
            tl::enums::ChatFull::Full(chat) => match chat.participants {
                tl::enums::ChatParticipants::Participants(list) => list
                    .participants
                    .iter()
                    .map(|p| match p {
                        tl::enums::ChatParticipant::Participant(p) => p.user_id,
                        tl::enums::ChatParticipant::Creator(p) => p.user_id,
                        tl::enums::ChatParticipant::Admin(p) => p.user_id,
                    })
                    .collect(),
                tl::enums::ChatParticipants::Forbidden(_) => {
                    return Err(Error::ChannelPrivate("CHAT_FORBIDDEN".into()))
                }
            },
            tl::enums::ChatFull::ChannelFull(_) => Vec::new(),
        };

        let users = users_by_id(&full.users);
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl MemberSource for TelegramSource {
    async fn resolve(&self, step: &ResolveStep) -> Result<ChannelInfo> {
        debug!("Resolving via {}", step);
        match step {
            ResolveStep::Handle(name) => self.resolve_handle(name).await,
            ResolveStep::AtHandle(name) => self.search_handle(name).await,
            ResolveStep::InviteJoin(hash) => self.join_invite(hash).await,
        }
    }

    async fn participants_page(
        &self,
        channel: &ChannelInfo,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Member>> {
        if channel.kind == ChatKind::BasicGroup {
            if offset > 0 {
                return Ok(Vec::new());
            }
            return self.basic_group_members(channel.id).await;
        }

        let result = self
            .client
            .invoke(&tl::functions::channels::GetParticipants {
                channel: input_channel(channel),
                filter: tl::enums::ChannelParticipantsFilter::ChannelParticipantsSearch(
                    tl::types::ChannelParticipantsSearch { q: String::new() },
                ),
                offset: clamp_i32(offset),
                limit: clamp_i32(limit),
                hash: 0,
            })
            .await?;

        match result {
            tl::enums::channels::ChannelParticipants::Participants(page) => {
                Ok(page.users.iter().filter_map(member_from_user).collect())
            }
            tl::enums::channels::ChannelParticipants::NotModified => Ok(Vec::new()),
        }
    }

    async fn history_page(
        &self,
        channel: &ChannelInfo,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let history = self
            .client
            .invoke(&tl::functions::messages::GetHistory {
                peer: input_peer(channel),
                offset_id,
                offset_date: 0,
                add_offset: 0,
                limit: clamp_i32(limit),
                max_id: 0,
                min_id: 0,
                hash: 0,
            })
            .await?;

        let (messages, users) = match history {
            tl::enums::messages::Messages::Messages(m) => (m.messages, m.users),
            tl::enums::messages::Messages::Slice(m) => (m.messages, m.users),
            tl::enums::messages::Messages::ChannelMessages(m) => (m.messages, m.users),
            tl::enums::messages::Messages::NotModified(_) => return Ok(Vec::new()),
        };

        let users = users_by_id(&users);
        Ok(messages
            .iter()
            .map(|message| message_record(message, &users))
            .collect())
    }

    async fn linked_chat(&self, channel: &ChannelInfo) -> Result<Option<ChannelInfo>> {
        if channel.kind == ChatKind::BasicGroup {
            return Ok(None);
        }

        let tl::enums::messages::ChatFull::Full(full) = self
            .client
            .invoke(&tl::functions::channels::GetFullChannel {
                channel: input_channel(channel),
            })
            .await?;

        let linked_id = match full.full_chat {
            tl::enums::ChatFull::ChannelFull(cf) => cf.linked_chat_id,
            tl::enums::ChatFull::Full(_) => None,
        };
        let Some(linked_id) = linked_id else {
            return Ok(None);
        };

        Ok(full
            .chats
            .iter()
            .filter_map(channel_from_chat)
            .find(|c| c.id == linked_id))
    }
}

fn clamp_i32(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn input_channel(channel: &ChannelInfo) -> tl::enums::InputChannel {
    tl::enums::InputChannel::Channel(tl::types::InputChannel {
        channel_id: channel.id,
        access_hash: channel.access_hash.unwrap_or(0),
    })
}

fn input_peer(channel: &ChannelInfo) -> tl::enums::InputPeer {
    match channel.kind {
        ChatKind::BasicGroup => {
            tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: channel.id })
        }
        ChatKind::Broadcast | ChatKind::Megagroup => {
            tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
                channel_id: channel.id,
                access_hash: channel.access_hash.unwrap_or(0),
            })
        }
    }
}

fn channel_from_peer(peer: &Peer) -> Option<ChannelInfo> {
    match peer {
        Peer::Channel(channel) => Some(channel_from_raw(&channel.raw)),
        Peer::Group(group) => channel_from_chat(&group.raw),
        Peer::User(_) => None,
    }
}

fn channel_from_raw(channel: &tl::types::Channel) -> ChannelInfo {
    ChannelInfo {
        id: channel.id,
        access_hash: channel.access_hash,
        kind: if channel.broadcast {
            ChatKind::Broadcast
        } else {
            ChatKind::Megagroup
        },
        title: channel.title.clone(),
        username: channel.username.clone(),
        participants_count: channel.participants_count,
    }
}

fn channel_from_chat(chat: &tl::enums::Chat) -> Option<ChannelInfo> {
    match chat {
        tl::enums::Chat::Channel(channel) => Some(channel_from_raw(channel)),
        tl::enums::Chat::Chat(group) => Some(ChannelInfo {
            id: group.id,
            access_hash: None,
            kind: ChatKind::BasicGroup,
            title: group.title.clone(),
            username: None,
            participants_count: Some(group.participants_count),
        }),
        _ => None,
    }
}

fn chat_from_updates(updates: &tl::enums::Updates) -> Option<ChannelInfo> {
    let chats = match updates {
        tl::enums::Updates::Combined(data) => &data.chats,
        tl::enums::Updates::Updates(data) => &data.chats,
        _ => return None,
    };
    chats.iter().find_map(channel_from_chat)
}

/// Convert a raw user; empty users are dropped.
pub fn member_from_user(user: &tl::enums::User) -> Option<Member> {
    match user {
        tl::enums::User::User(u) => Some(Member {
            id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone().unwrap_or_default(),
            last_name: u.last_name.clone().unwrap_or_default(),
            is_bot: u.bot,
            is_deleted: u.deleted,
            premium: u.premium,
            verified: u.verified,
            scam: u.scam,
            fake: u.fake,
            method: None,
        }),
        tl::enums::User::Empty(_) => None,
    }
}

fn users_by_id(users: &[tl::enums::User]) -> HashMap<i64, Member> {
    users
        .iter()
        .filter_map(member_from_user)
        .map(|m| (m.id, m))
        .collect()
}

fn message_record(message: &tl::enums::Message, users: &HashMap<i64, Member>) -> MessageRecord {
    match message {
        tl::enums::Message::Message(m) => {
            let author = match &m.from_id {
                Some(tl::enums::Peer::User(u)) => users.get(&u.user_id).cloned(),
                _ => None,
            };
            let has_reactions = match &m.reactions {
                Some(tl::enums::MessageReactions::Reactions(r)) => !r.results.is_empty(),
                None => false,
            };
            MessageRecord {
                id: m.id,
                author,
                has_reactions,
            }
        }
        tl::enums::Message::Service(m) => MessageRecord {
            id: m.id,
            author: None,
            has_reactions: false,
        },
        tl::enums::Message::Empty(m) => MessageRecord {
            id: m.id,
            author: None,
            has_reactions: false,
        },
    }
}
