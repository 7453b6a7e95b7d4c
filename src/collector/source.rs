//! The provider seam of the collection engine.
//!
//! One call per paginated request, so the engine owns pacing, backoff and
//! de-duplication while the provider only translates pages.

use async_trait::async_trait;

use super::{ChannelInfo, Member, MessageRecord};
use crate::error::Result;
use crate::target::ResolveStep;

#[async_trait]
pub trait MemberSource: Send + Sync {
    /// Turn one resolution step into a concrete channel or group.
    async fn resolve(&self, step: &ResolveStep) -> Result<ChannelInfo>;

    /// One page of the member list starting at `offset`.
    async fn participants_page(
        &self,
        channel: &ChannelInfo,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Member>>;

    /// One page of history older than `offset_id` (0 = newest).
    async fn history_page(
        &self,
        channel: &ChannelInfo,
        offset_id: i32,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// The discussion group attached to a broadcast channel, if any.
    async fn linked_chat(&self, channel: &ChannelInfo) -> Result<Option<ChannelInfo>>;
}
