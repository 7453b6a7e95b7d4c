//! Error types for the member collector
//!
//! Every error can be reduced to an [`ErrorKind`], the four outcomes a
//! collection job reports back to the user.

use grammers_client::InvocationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session file not found: {0}")]
    SessionNotFound(String),

    #[error("Session is locked by another process")]
    SessionLocked,

    #[error("Failed to acquire session lock: {0}")]
    LockError(String),

    #[error("Telegram API error: {name} (code {code})")]
    Telegram { name: String, code: i32 },

    #[error("Flood wait: retry after {0} seconds")]
    FloodWait(u32),

    #[error("Channel is private or inaccessible: {0}")]
    ChannelPrivate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited { seconds: u32 },
    Private,
    NotFound,
    Generic,
}

const FLOOD_ERRORS: &[&str] = &["FLOOD_WAIT", "FLOOD_PREMIUM_WAIT", "SLOWMODE_WAIT"];

const PRIVATE_ERRORS: &[&str] = &[
    "CHANNEL_PRIVATE",
    "CHAT_ADMIN_REQUIRED",
    "CHAT_FORBIDDEN",
    "INVITE_REQUEST_SENT",
    "USER_BANNED_IN_CHANNEL",
    "CHANNEL_PUBLIC_GROUP_NA",
];

const NOT_FOUND_ERRORS: &[&str] = &[
    "USERNAME_NOT_OCCUPIED",
    "USERNAME_INVALID",
    "CHANNEL_INVALID",
    "PEER_ID_INVALID",
    "INVITE_HASH_EXPIRED",
    "INVITE_HASH_INVALID",
];

impl Error {
    /// Map an RPC error name (digits already stripped) to an error.
    pub fn from_rpc(name: &str, code: i32, value: Option<u32>) -> Self {
        if FLOOD_ERRORS.contains(&name) {
            return Error::FloodWait(value.unwrap_or(0));
        }
        if PRIVATE_ERRORS.contains(&name) {
            return Error::ChannelPrivate(name.to_string());
        }
        if NOT_FOUND_ERRORS.contains(&name) {
            return Error::NotFound(name.to_string());
        }
        Error::Telegram {
            name: name.to_string(),
            code,
        }
    }

    pub fn from_invocation(err: &InvocationError) -> Self {
        match err {
            InvocationError::Rpc(rpc) => Error::from_rpc(&rpc.name, rpc.code, rpc.value),
            other => {
                let text = other.to_string();
                match parse_flood_wait_seconds(&text) {
                    Some(secs) => Error::FloodWait(secs),
                    None => Error::Unknown(text),
                }
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FloodWait(seconds) => ErrorKind::RateLimited { seconds: *seconds },
            Error::ChannelPrivate(_) | Error::AccessDenied(_) => ErrorKind::Private,
            Error::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Generic,
        }
    }

    /// Short sentence suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::RateLimited { seconds } => format!(
                "Telegram rate limit hit, try again in {} seconds",
                seconds
            ),
            ErrorKind::Private => {
                "The channel is private: send an invite link (t.me/+...) instead".to_string()
            }
            ErrorKind::NotFound => "Channel not found, check the username".to_string(),
            ErrorKind::Generic => format!("Collection failed: {}", self),
        }
    }
}

impl From<InvocationError> for Error {
    fn from(err: InvocationError) -> Self {
        Error::from_invocation(&err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Export(err.to_string())
    }
}

/// Extract flood wait seconds from an error string (best-effort)
pub fn parse_flood_wait_seconds(error: &str) -> Option<u32> {
    if let Some(idx) = error.find("FLOOD_WAIT_") {
        let start = idx + "FLOOD_WAIT_".len();
        let secs = error[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(v) = secs.parse::<u32>() {
            return Some(v);
        }
    }

    if error.contains("FLOOD_WAIT") {
        if let Some(idx) = error.find("value:") {
            let start = idx + "value:".len();
            let secs = error[start..]
                .trim_start()
                .trim_start_matches("Some(")
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>();
            if let Ok(v) = secs.parse::<u32>() {
                return Some(v);
            }
        }
    }

    None
}
