//! `logout` command: revoke the collector session

use crate::config::Config;
use crate::error::Result;
use crate::session::{self, SessionLock};

pub async fn run(config: &Config) -> Result<()> {
    let _lock = SessionLock::acquire(config)?;
    session::logout(config).await?;
    println!("Logged out, {} removed", config.session_file().display());
    Ok(())
}
