//! Channel input parsing and the entity resolution plan

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_INPUT_LEN: usize = 255;

static ALLOWED_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+@./:\-?=&]+$").expect("valid regex"));

static INVITE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:t\.me|telegram\.me|telegram\.dog)/(?:joinchat/|\+)([A-Za-z0-9_\-]+)")
        .expect("valid regex")
});

static PUBLIC_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:t\.me|telegram\.me|telegram\.dog)/([A-Za-z0-9_]+)").expect("valid regex")
});

/// What the user asked us to collect from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTarget {
    /// Public channel or group by username (without @)
    Public(String),
    /// Private group reachable only through an invite hash
    Invite(String),
    /// Username that may be private, with an invite hash as last resort
    Private { name: String, hash: String },
}

/// One attempt to turn a target into a concrete entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStep {
    /// Plain username lookup
    Handle(String),
    /// The same lookup with the @ prefix kept
    AtHandle(String),
    /// Join through an invite hash
    InviteJoin(String),
}

impl fmt::Display for ResolveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveStep::Handle(name) => write!(f, "handle {}", name),
            ResolveStep::AtHandle(name) => write!(f, "handle {}", name),
            ResolveStep::InviteJoin(hash) => write!(f, "invite +{}", hash),
        }
    }
}

impl ChannelTarget {
    /// Parse `name`, `@name`, `t.me/name`, `t.me/+hash` or `t.me/joinchat/hash`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        validate_channel_input(trimmed)?;

        if let Some(caps) = INVITE_LINK.captures(trimmed) {
            return Ok(ChannelTarget::Invite(caps[1].to_string()));
        }
        if let Some(hash) = trimmed.strip_prefix('+') {
            if !hash.is_empty() {
                return Ok(ChannelTarget::Invite(hash.to_string()));
            }
        }

        let name = extract_channel_username(trimmed);
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a channel username or link",
                input
            )));
        }
        Ok(ChannelTarget::Public(name))
    }

    /// Ordered resolution attempts, first success wins.
    pub fn resolution_plan(&self) -> Vec<ResolveStep> {
        match self {
            ChannelTarget::Public(name) => vec![
                ResolveStep::Handle(name.clone()),
                ResolveStep::AtHandle(format!("@{}", name)),
            ],
            ChannelTarget::Invite(hash) => vec![ResolveStep::InviteJoin(hash.clone())],
            ChannelTarget::Private { name, hash } => vec![
                ResolveStep::Handle(name.clone()),
                ResolveStep::AtHandle(format!("@{}", name)),
                ResolveStep::InviteJoin(hash.clone()),
            ],
        }
    }

    /// Attach an invite link to a public name so resolution can fall back to joining.
    pub fn with_invite(self, invite: &str) -> Result<Self> {
        let hash = match ChannelTarget::parse(invite)? {
            ChannelTarget::Invite(hash) => hash,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not an invite link",
                    invite
                )))
            }
        };
        match self {
            ChannelTarget::Public(name) | ChannelTarget::Private { name, .. } => {
                Ok(ChannelTarget::Private { name, hash })
            }
            ChannelTarget::Invite(_) => Ok(ChannelTarget::Invite(hash)),
        }
    }

    /// Stable identifier for cache keys and file names.
    pub fn cache_key(&self) -> String {
        match self {
            ChannelTarget::Public(name) | ChannelTarget::Private { name, .. } => {
                name.to_lowercase()
            }
            ChannelTarget::Invite(hash) => format!("+{}", hash),
        }
    }

    /// File-name friendly label.
    pub fn label(&self) -> String {
        match self {
            ChannelTarget::Public(name) | ChannelTarget::Private { name, .. } => name.clone(),
            ChannelTarget::Invite(hash) => format!("invite_{}", hash),
        }
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, ChannelTarget::Invite(_))
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::Public(name) | ChannelTarget::Private { name, .. } => {
                write!(f, "@{}", name)
            }
            ChannelTarget::Invite(hash) => write!(f, "t.me/+{}", hash),
        }
    }
}

/// Reject empty, oversized or oddly-charactered input.
pub fn validate_channel_input(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(Error::InvalidArgument("channel is empty".into()));
    }
    if input.len() > MAX_INPUT_LEN {
        return Err(Error::InvalidArgument(format!(
            "channel is longer than {} characters",
            MAX_INPUT_LEN
        )));
    }
    if !ALLOWED_INPUT.is_match(input) {
        return Err(Error::InvalidArgument(format!(
            "channel '{}' contains unsupported characters",
            input
        )));
    }
    Ok(())
}

/// Strip link prefix, @ and query string from a public reference.
pub fn extract_channel_username(input: &str) -> String {
    let mut rest = input.trim();
    if let Some(caps) = PUBLIC_LINK.captures(rest) {
        if let Some(m) = caps.get(1) {
            return m.as_str().to_string();
        }
    }
    if let Some(idx) = rest.find("t.me/") {
        rest = &rest[idx + "t.me/".len()..];
    }
    let rest = rest.trim_start_matches('@');
    let rest = rest.split(['?', '/']).next().unwrap_or(rest);
    rest.trim().to_string()
}
