//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod admin;
pub mod bot;
pub mod collect;
pub mod init_session;
pub mod logout;

pub use bot::BotCommand;
pub use collect::{collect_cached, CollectArgs, Collected};
