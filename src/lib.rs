//! Telegram member collector with a subscription bot front-end
//!
//! This library provides:
//! - A multi-strategy collection engine (member list, message authors,
//!   discussion comments, reactions) with de-duplication and flood-wait backoff
//! - Channel resolution with handle, `@handle` and invite-link fallbacks
//! - TXT/CSV/JSON export and a result cache
//! - A JSON subscription store and a teloxide bot that sells access to the engine

pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod export;
pub mod metrics;
pub mod session;
pub mod subscription;
pub mod target;
pub mod telegram;

// Re-export common types
pub use collector::{
    CollectRequest, CollectionResult, CollectionStats, Collector, Member, MemberSource, Method,
};
pub use config::{CollectorSettings, Config};
pub use error::{Error, ErrorKind, Result};
pub use session::{check_session_exists, SessionLock};
pub use target::{ChannelTarget, ResolveStep};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
