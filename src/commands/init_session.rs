//! Session initialization command

use std::io::{self, Write};

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::session::{connect_for_init, sign_in_interactive, SessionLock};

pub async fn run(config: &Config) -> Result<()> {
    let session_file = config.session_file();
    if session_file.exists() {
        print!(
            "Session '{}' already exists. Signing in again may end other sessions.\nType 'YES' to continue: ",
            session_file.display()
        );
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            println!("Cancelled, session left untouched.");
            return Ok(());
        }
    }

    let _lock = SessionLock::acquire(config)?;
    let client = connect_for_init(config).await?;
    sign_in_interactive(&client, config).await?;

    let me = client.get_me().await?;
    info!("Session ready for user id {}", me.raw.id());
    println!(
        "Session created: {}\nKeep this file private, it grants full account access.",
        session_file.display()
    );
    Ok(())
}
